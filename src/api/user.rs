use std::ops::Deref;

use actix_web::dev::HttpServiceFactory;
use actix_web::{post, web, Responder};
use diesel::insert_into;
use diesel::prelude::*;
use diesel::result::Error;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::api::common;
use crate::api::common::{APIResult, ErrorCode};
use crate::error::GbbError;
use crate::models::User;
use crate::roles::Role;
use crate::schema::{roles, users};
use crate::{AppState, DbConnection};

pub const TOKEN_LENGTH: usize = 32;
const MAX_USERNAME_BYTES: usize = 32;
const MIN_USERNAME_BYTES: usize = 3;
const MAX_DISPLAY_NAME_BYTES: usize = 64;
const MIN_PASSWORD_BYTES: usize = 8;

fn validate_username(username: &str) -> Option<ErrorCode> {
    if username.len() > MAX_USERNAME_BYTES {
        return Some(ErrorCode::NameTooLong);
    }
    if username.len() < MIN_USERNAME_BYTES {
        return Some(ErrorCode::NameTooShort);
    }
    lazy_static! {
        static ref USERNAME_REGEX: Regex = Regex::new("^[a-zA-Z0-9_]+$").unwrap();
    }
    if !USERNAME_REGEX.is_match(username) {
        return Some(ErrorCode::UsernameInvalid);
    }
    None
}

fn validate_display_name(display_name: &str) -> Option<ErrorCode> {
    if display_name.len() > MAX_DISPLAY_NAME_BYTES {
        return Some(ErrorCode::NameTooLong);
    }
    if display_name.trim().is_empty() {
        return Some(ErrorCode::FieldRequired);
    }
    None
}

/// Complexity rule: at least 8 bytes with at least one letter and one digit.
fn validate_password(password: &str) -> Option<ErrorCode> {
    if password.len() < MIN_PASSWORD_BYTES
        || !password.chars().any(|ch| ch.is_ascii_alphabetic())
        || !password.chars().any(|ch| ch.is_ascii_digit())
    {
        return Some(ErrorCode::PasswordTooWeak);
    }
    None
}

pub fn is_token(token: &str) -> bool {
    token.chars().all(|ch| ch.is_ascii_alphanumeric()) && token.len() == TOKEN_LENGTH
}

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(rand::distributions::Alphanumeric)
        .take(TOKEN_LENGTH)
        .collect()
}

/// Resolves the acting user from a session token. Identity always travels
/// with the request; there is no process-global current user.
pub fn get_user(connection: &DbConnection, token: &str) -> Result<Option<User>, Error> {
    if !is_token(token) {
        return Ok(None);
    }
    let user: Option<User> = users::table
        .filter(users::token.eq(token))
        .first(connection)
        .optional()?;
    Ok(user)
}

pub fn get_user_id(connection: &DbConnection, token: &str) -> Result<Option<i64>, Error> {
    if !is_token(token) {
        return Ok(None);
    }
    let user_id: Option<i64> = users::table
        .filter(users::token.eq(token))
        .select(users::id)
        .first(connection)
        .optional()?;
    Ok(user_id)
}

fn role_display(connection: &DbConnection, role_id: i32) -> Result<(String, String), Error> {
    roles::table
        .filter(roles::id.eq(role_id))
        .select((roles::name, roles::color))
        .first(connection)
}

#[derive(Deserialize)]
struct RegisterPayload {
    username: String,
    display_name: String,
    password: String,
    confirm_password: String,
}

#[derive(Serialize)]
struct RegisterResponse {
    token: String,
    username: String,
}

fn register<TCon: Deref<Target = DbConnection>>(
    connection: TCon,
    token: String,
    username: String,
    display_name: String,
    password: String,
) -> Result<APIResult<RegisterResponse>, GbbError> {
    if diesel::select(diesel::dsl::exists(
        users::table.filter(users::username.eq(&username)),
    ))
    .get_result(&*connection)?
    {
        return Ok(APIResult::error(ErrorCode::NameDuplicated));
    }
    insert_into(users::table)
        .values((
            users::token.eq(&token),
            users::username.eq(&username),
            users::display_name.eq(&display_name),
            users::password.eq(&password),
            users::role_id.eq(Role::Standard.id()),
        ))
        .execute(&*connection)?;
    Ok(APIResult::success_return(RegisterResponse { token, username }))
}

#[post("/register")]
async fn register_handler(
    state: web::Data<AppState>,
    payload: web::Json<RegisterPayload>,
) -> Result<impl Responder, GbbError> {
    if let Some(error_code) = validate_username(&payload.username) {
        return Ok(common::error_response_with_code(error_code));
    }
    if let Some(error_code) = validate_display_name(&payload.display_name) {
        return Ok(common::error_response_with_code(error_code));
    }
    if let Some(error_code) = validate_password(&payload.password) {
        return Ok(common::error_response_with_code(error_code));
    }
    if payload.password != payload.confirm_password {
        return Ok(common::error_response_with_code(ErrorCode::PasswordMismatch));
    }
    let token = generate_token();
    let connection = state.db_pool.get()?;
    Ok(web::block(move || {
        register(
            connection,
            token,
            payload.0.username,
            payload.0.display_name,
            payload.0.password,
        )
    })
    .await??
    .into_responder())
}

#[derive(Deserialize)]
struct LoginPayload {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct SessionResponse {
    token: String,
    username: String,
    display_name: String,
    role_id: i32,
    role_name: String,
    badge_color: String,
    avatar_url: String,
}

fn login<TCon: Deref<Target = DbConnection>>(
    connection: TCon,
    username: String,
    password: String,
    new_token: String,
) -> Result<APIResult<SessionResponse>, GbbError> {
    let user: Option<User> = users::table
        .filter(users::username.eq(&username))
        .first(&*connection)
        .optional()?;
    if let Some(user) = user {
        // Credential compare is a plain equality check; a mismatch is a login
        // failure outcome, never an error that crosses into content logic.
        if user.password != password {
            return Ok(APIResult::error(ErrorCode::InvalidCredentials));
        }
        diesel::update(&user)
            .set(users::token.eq(&new_token))
            .execute(&*connection)?;
        let (role_name, badge_color) = role_display(&connection, user.role_id)?;
        let avatar_url = common::avatar_url(&user.display_name, &user.username);
        Ok(APIResult::success_return(SessionResponse {
            token: new_token,
            username: user.username,
            display_name: user.display_name,
            role_id: user.role_id,
            role_name,
            badge_color,
            avatar_url,
        }))
    } else {
        Ok(APIResult::error(ErrorCode::InvalidCredentials))
    }
}

#[post("/login")]
async fn login_handler(
    state: web::Data<AppState>,
    payload: web::Json<LoginPayload>,
) -> Result<impl Responder, GbbError> {
    let new_token = generate_token();
    let connection = state.db_pool.get()?;
    Ok(
        web::block(move || login(connection, payload.0.username, payload.0.password, new_token))
            .await??
            .into_responder(),
    )
}

#[derive(Deserialize)]
struct InitPayload {
    token: String,
}

#[derive(Serialize)]
struct InitResponse {
    username: String,
    display_name: String,
    role_id: i32,
    role_name: String,
    badge_color: String,
    avatar_url: String,
}

fn init<TCon: Deref<Target = DbConnection>>(
    connection: TCon,
    token: String,
) -> Result<APIResult<InitResponse>, GbbError> {
    if let Some(user) = get_user(&connection, &token)? {
        let (role_name, badge_color) = role_display(&connection, user.role_id)?;
        let avatar_url = common::avatar_url(&user.display_name, &user.username);
        Ok(APIResult::success_return(InitResponse {
            username: user.username,
            display_name: user.display_name,
            role_id: user.role_id,
            role_name,
            badge_color,
            avatar_url,
        }))
    } else {
        Ok(APIResult::forbidden())
    }
}

#[post("/init")]
async fn init_handler(
    state: web::Data<AppState>,
    payload: web::Json<InitPayload>,
) -> Result<impl Responder, GbbError> {
    let connection = state.db_pool.get()?;
    Ok(web::block(move || init(connection, payload.0.token))
        .await??
        .into_responder())
}

pub fn get_service() -> impl HttpServiceFactory {
    web::scope("/user")
        .service(register_handler)
        .service(login_handler)
        .service(init_handler)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_shape_is_checked() {
        assert!(is_token(&"a".repeat(32)));
        assert!(!is_token(&"a".repeat(31)));
        assert!(!is_token(&"a".repeat(33)));
        assert!(!is_token(&format!("{}!", "a".repeat(31))));
    }

    #[test]
    fn username_rules() {
        assert_eq!(validate_username("pat_smith"), None);
        assert_eq!(validate_username("ab"), Some(ErrorCode::NameTooShort));
        assert_eq!(
            validate_username(&"a".repeat(33)),
            Some(ErrorCode::NameTooLong)
        );
        assert_eq!(validate_username("pat smith"), Some(ErrorCode::UsernameInvalid));
        assert_eq!(validate_username("pat-smith"), Some(ErrorCode::UsernameInvalid));
    }

    #[test]
    fn display_name_rules() {
        assert_eq!(validate_display_name("Pat Smith"), None);
        assert_eq!(validate_display_name("  "), Some(ErrorCode::FieldRequired));
        assert_eq!(
            validate_display_name(&"a".repeat(65)),
            Some(ErrorCode::NameTooLong)
        );
    }

    #[test]
    fn password_complexity() {
        assert_eq!(validate_password("abcdef12"), None);
        assert_eq!(validate_password("short1"), Some(ErrorCode::PasswordTooWeak));
        assert_eq!(
            validate_password("allletters"),
            Some(ErrorCode::PasswordTooWeak)
        );
        assert_eq!(validate_password("12345678"), Some(ErrorCode::PasswordTooWeak));
    }
}
