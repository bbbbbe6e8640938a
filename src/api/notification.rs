use std::ops::Deref;

use actix_web::dev::HttpServiceFactory;
use actix_web::{get, post, web, HttpResponse, Responder};
use diesel::insert_into;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::api::common;
use crate::api::common::{APIResult, ErrorCode};
use crate::api::user;
use crate::error::GbbError;
use crate::models::Notification;
use crate::roles::{role_of, Role};
use crate::schema::{notifications, roles, users};
use crate::{AppState, DbConnection};

const MAX_TITLE_BYTES: usize = 256;
const MAX_CONTENT_BYTES: usize = 4096;
const MAX_CATEGORY_BYTES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NotificationStatus {
    Active,
    Archived,
}

impl NotificationStatus {
    fn as_str(self) -> &'static str {
        match self {
            NotificationStatus::Active => "Active",
            NotificationStatus::Archived => "Archived",
        }
    }

    fn parse(value: &str) -> Option<NotificationStatus> {
        match value {
            "Active" => Some(NotificationStatus::Active),
            "Archived" => Some(NotificationStatus::Archived),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct CreatePayload {
    token: String,
    title: String,
    content: String,
    category: String,
    status: Option<String>,
}

#[derive(Serialize)]
struct CreateResponse {
    id: i64,
}

/// Council announcements may be created straight into the archive; Police
/// notifications always go out Active.
fn create<TCon: Deref<Target = DbConnection>>(
    connection: TCon,
    token: String,
    title: String,
    content: String,
    category: String,
    status: Option<String>,
    current_timestamp: i64,
) -> Result<APIResult<CreateResponse>, GbbError> {
    let acting_user = match user::get_user(&connection, &token)? {
        Some(acting_user) => acting_user,
        None => return Ok(APIResult::forbidden()),
    };
    let role = role_of(&acting_user);
    if !role.can_create_notification() {
        return Ok(APIResult::forbidden());
    }
    let status = if role == Role::Council {
        match status {
            Some(value) => match NotificationStatus::parse(&value) {
                Some(status) => status,
                None => return Ok(APIResult::error(ErrorCode::UnknownStatus)),
            },
            None => NotificationStatus::Active,
        }
    } else {
        NotificationStatus::Active
    };
    let notification_id: i64 = insert_into(notifications::table)
        .values((
            notifications::user_id.eq(acting_user.id),
            notifications::by_role_id.eq(acting_user.role_id),
            notifications::title.eq(&title),
            notifications::content.eq(&content),
            notifications::created_at.eq(current_timestamp),
            notifications::category.eq(&category),
            notifications::status.eq(status.as_str()),
        ))
        .returning(notifications::id)
        .get_result(&*connection)?;
    Ok(APIResult::success_return(CreateResponse { id: notification_id }))
}

#[post("/create")]
async fn create_handler(
    state: web::Data<AppState>,
    payload: web::Json<CreatePayload>,
) -> Result<impl Responder, GbbError> {
    if let Some(error_code) =
        common::validate_required_text(&payload.title, MAX_TITLE_BYTES, ErrorCode::TitleTooLong)
    {
        return Ok(common::error_response_with_code(error_code));
    }
    if let Some(error_code) =
        common::validate_required_text(&payload.content, MAX_CONTENT_BYTES, ErrorCode::ContentTooLong)
    {
        return Ok(common::error_response_with_code(error_code));
    }
    if let Some(error_code) =
        common::validate_required_text(&payload.category, MAX_CATEGORY_BYTES, ErrorCode::ContentTooLong)
    {
        return Ok(common::error_response_with_code(error_code));
    }
    let connection = state.db_pool.get()?;
    let current_timestamp = common::get_current_timestamp();
    Ok(web::block(move || {
        create(
            connection,
            payload.0.token,
            payload.0.title,
            payload.0.content,
            payload.0.category,
            payload.0.status,
            current_timestamp,
        )
    })
    .await??
    .into_responder())
}

#[derive(Queryable)]
struct NotificationQueryResult {
    notification: Notification,
    username: String,
    display_name: String,
    role_name: String,
    role_color: String,
}

#[derive(Serialize)]
struct RoleBadgeResponse {
    name: String,
    badge_color: String,
}

#[derive(Serialize)]
struct SingleNotificationResponse {
    id: i64,
    title: String,
    content: String,
    category: String,
    created_at: i64,
    author_display_name: String,
    author_avatar_url: String,
    by_role: RoleBadgeResponse,
}

/// One shared feed for Council announcements and Police notifications; the
/// issuing role's badge is what segments them at render time.
fn load_feed<TCon: Deref<Target = DbConnection>>(
    connection: TCon,
) -> Result<Vec<SingleNotificationResponse>, GbbError> {
    let results: Vec<NotificationQueryResult> = notifications::table
        .inner_join(users::table)
        .inner_join(roles::table)
        .select((
            notifications::table::all_columns(),
            users::username,
            users::display_name,
            roles::name,
            roles::color,
        ))
        .filter(notifications::status.eq(NotificationStatus::Active.as_str()))
        .order_by(notifications::created_at.desc())
        .load(&*connection)?;
    Ok(results
        .into_iter()
        .map(
            |NotificationQueryResult {
                 notification,
                 username,
                 display_name,
                 role_name,
                 role_color,
             }| {
                let author_avatar_url = common::avatar_url(&display_name, &username);
                SingleNotificationResponse {
                    id: notification.id,
                    title: notification.title,
                    content: notification.content,
                    category: notification.category,
                    created_at: notification.created_at,
                    author_display_name: display_name,
                    author_avatar_url,
                    by_role: RoleBadgeResponse {
                        name: role_name,
                        badge_color: role_color,
                    },
                }
            },
        )
        .collect())
}

#[get("/feed")]
async fn feed_handler(state: web::Data<AppState>) -> Result<impl Responder, GbbError> {
    let connection = state.db_pool.get()?;
    let feed = web::block(move || load_feed(connection)).await??;
    Ok(HttpResponse::Ok().json(feed))
}

pub fn get_service() -> impl HttpServiceFactory {
    web::scope("/notification")
        .service(create_handler)
        .service(feed_handler)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_status_round_trips() {
        assert_eq!(NotificationStatus::parse("Active"), Some(NotificationStatus::Active));
        assert_eq!(
            NotificationStatus::parse("Archived"),
            Some(NotificationStatus::Archived)
        );
        assert_eq!(NotificationStatus::parse("active"), None);
        assert_eq!(NotificationStatus::parse("Deleted"), None);
    }
}
