use std::time::{SystemTime, UNIX_EPOCH};

use actix_web::HttpResponse;
use percent_encoding::NON_ALPHANUMERIC;
use serde::Serialize;
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::dark_colors::DARK_COLORS;

#[derive(Serialize_repr, Deserialize_repr, Debug, PartialEq)]
#[repr(u8)]
pub enum ErrorCode {
    NameDuplicated = 1,
    NameTooLong = 2,
    NameTooShort = 3,
    UsernameInvalid = 4,
    PasswordTooWeak = 5,
    PasswordMismatch = 6,
    InvalidCredentials = 7,
    FieldRequired = 8,
    TitleTooLong = 9,
    ContentTooLong = 10,
    RatingNotSelected = 11,
    RatingOutOfRange = 12,
    NotFound = 13,
    SelfReport = 14,
    UnknownStatus = 15,
    CategoryDetailRequired = 16,
}

pub fn get_current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_millis().try_into().expect("Hello future")
}

/// Empty required fields and oversized fields are both inline rejections;
/// the operation is not applied.
pub fn validate_required_text(value: &str, max_bytes: usize, too_long: ErrorCode) -> Option<ErrorCode> {
    if value.trim().is_empty() {
        return Some(ErrorCode::FieldRequired);
    }
    if value.len() > max_bytes {
        return Some(too_long);
    }
    None
}

/// Deterministic avatar for a user, in the style the rest of the site uses:
/// the display name rendered by ui-avatars on a background color picked by
/// hashing the username.
pub fn avatar_url(display_name: &str, username: &str) -> String {
    let display_name_encoded =
        percent_encoding::utf8_percent_encode(display_name, NON_ALPHANUMERIC).to_string();
    let color = DARK_COLORS
        [(seahash::hash(username.as_bytes()) % (DARK_COLORS.len() as u64)) as usize];
    format!(
        "https://ui-avatars.com/api/{}/128/{}/ffffff",
        display_name_encoded, color
    )
}

#[derive(Serialize)]
struct ErrorResponseWithCode {
    success: bool,
    code: ErrorCode,
}

pub fn error_response_with_code(code: ErrorCode) -> HttpResponse {
    HttpResponse::Ok().json(ErrorResponseWithCode { success: false, code })
}

#[derive(Serialize)]
pub struct Empty {}

/// Outcome of one logical operation: applied, rejected with an inline
/// validation code, or refused on a permission check. Permission refusals
/// render as 403 so the caller can send the user back to the login screen.
pub enum APIResult<T: Serialize = Empty> {
    Success(T),
    Error(ErrorCode),
    Forbidden,
}

impl<T: Serialize> APIResult<T> {
    pub fn success_return(value: T) -> Self {
        APIResult::Success(value)
    }
    pub fn error(code: ErrorCode) -> Self {
        APIResult::Error(code)
    }
    pub fn forbidden() -> Self {
        APIResult::Forbidden
    }
    pub fn into_responder(self) -> HttpResponse {
        match self {
            APIResult::Success(value) => {
                #[derive(Serialize)]
                struct SerializeHelper<T: Serialize> {
                    success: bool,

                    #[serde(flatten)]
                    value: T,
                }
                HttpResponse::Ok().json(SerializeHelper { success: true, value })
            }
            APIResult::Error(code) => error_response_with_code(code),
            APIResult::Forbidden => HttpResponse::Forbidden().finish(),
        }
    }
}

impl APIResult<Empty> {
    pub fn success() -> Self {
        APIResult::Success(Empty {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_text_rejects_empty_and_whitespace() {
        assert_eq!(
            validate_required_text("", 16, ErrorCode::ContentTooLong),
            Some(ErrorCode::FieldRequired)
        );
        assert_eq!(
            validate_required_text("   ", 16, ErrorCode::ContentTooLong),
            Some(ErrorCode::FieldRequired)
        );
    }

    #[test]
    fn required_text_rejects_oversized() {
        assert_eq!(
            validate_required_text("abcdef", 5, ErrorCode::TitleTooLong),
            Some(ErrorCode::TitleTooLong)
        );
        assert_eq!(validate_required_text("abcde", 5, ErrorCode::TitleTooLong), None);
    }

    #[test]
    fn avatar_url_is_deterministic_and_encoded() {
        let first = avatar_url("Pat Smith", "pat_smith");
        let second = avatar_url("Pat Smith", "pat_smith");
        assert_eq!(first, second);
        assert!(first.contains("Pat%20Smith"));
        assert!(first.starts_with("https://ui-avatars.com/api/"));
    }
}
