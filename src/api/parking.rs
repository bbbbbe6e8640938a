use std::collections::HashMap;
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
use crate::models::{ParkingPost, ParkingRating};
use crate::roles::role_of;
use crate::schema::{parking_posts, parking_ratings, users};
use crate::{AppState, DbConnection};

const MAX_LOCATION_BYTES: usize = 256;
const MAX_TYPE_BYTES: usize = 64;
const MAX_CONTENT_BYTES: usize = 4096;

pub const MIN_RATING: i16 = 1;
pub const MAX_RATING: i16 = 5;

/// Undefined (reported as "no ratings") when the post has no ratings,
/// otherwise the arithmetic mean rounded to one decimal place.
fn average_rating(ratings: &[i16]) -> Option<f64> {
    if ratings.is_empty() {
        return None;
    }
    let sum: i64 = ratings.iter().map(|rating| i64::from(*rating)).sum();
    let mean = sum as f64 / ratings.len() as f64;
    Some((mean * 10.0).round() / 10.0)
}

/// Resolves an optional session token into an optional author id. Anonymous
/// submissions are allowed, but a token that is present must resolve.
fn resolve_author(
    connection: &DbConnection,
    token: Option<&str>,
) -> Result<Option<Option<i64>>, diesel::result::Error> {
    match token {
        None => Ok(Some(None)),
        Some(token) => Ok(user::get_user_id(connection, token)?.map(Some)),
    }
}

#[derive(Serialize)]
struct AuthorResponse {
    username: String,
    display_name: String,
    avatar_url: String,
}

fn author_response(username: Option<String>, display_name: Option<String>) -> Option<AuthorResponse> {
    match (username, display_name) {
        (Some(username), Some(display_name)) => {
            let avatar_url = common::avatar_url(&display_name, &username);
            Some(AuthorResponse {
                username,
                display_name,
                avatar_url,
            })
        }
        _ => None,
    }
}

#[derive(Deserialize)]
struct CreatePayload {
    token: Option<String>,
    location: String,
    post_type: String,
    amt_slots: i32,
    content: String,
}

#[derive(Serialize)]
struct CreateResponse {
    id: i64,
}

fn create<TCon: Deref<Target = DbConnection>>(
    connection: TCon,
    token: Option<String>,
    location: String,
    post_type: String,
    amt_slots: i32,
    content: String,
    current_timestamp: i64,
) -> Result<APIResult<CreateResponse>, GbbError> {
    let created_by = match resolve_author(&connection, token.as_deref())? {
        Some(created_by) => created_by,
        None => return Ok(APIResult::forbidden()),
    };
    let post_id: i64 = insert_into(parking_posts::table)
        .values((
            parking_posts::created_by.eq(created_by),
            parking_posts::location.eq(&location),
            parking_posts::post_type.eq(&post_type),
            parking_posts::amt_slots.eq(amt_slots),
            parking_posts::content.eq(&content),
            parking_posts::created_at.eq(current_timestamp),
        ))
        .returning(parking_posts::id)
        .get_result(&*connection)?;
    Ok(APIResult::success_return(CreateResponse { id: post_id }))
}

#[post("/create")]
async fn create_handler(
    state: web::Data<AppState>,
    payload: web::Json<CreatePayload>,
) -> Result<impl Responder, GbbError> {
    for (value, max, code) in [
        (&payload.location, MAX_LOCATION_BYTES, ErrorCode::ContentTooLong),
        (&payload.post_type, MAX_TYPE_BYTES, ErrorCode::ContentTooLong),
        (&payload.content, MAX_CONTENT_BYTES, ErrorCode::ContentTooLong),
    ] {
        if let Some(error_code) = common::validate_required_text(value, max, code) {
            return Ok(common::error_response_with_code(error_code));
        }
    }
    let connection = state.db_pool.get()?;
    let current_timestamp = common::get_current_timestamp();
    Ok(web::block(move || {
        create(
            connection,
            payload.0.token,
            payload.0.location,
            payload.0.post_type,
            payload.0.amt_slots,
            payload.0.content,
            current_timestamp,
        )
    })
    .await??
    .into_responder())
}

#[derive(Deserialize)]
struct RatePayload {
    token: Option<String>,
    post_id: i64,
    rating: Option<i16>,
    comment: Option<String>,
}

fn rate<TCon: Deref<Target = DbConnection>>(
    connection: TCon,
    token: Option<String>,
    post_id: i64,
    rating: i16,
    comment: Option<String>,
) -> Result<APIResult, GbbError> {
    let rated_by = match resolve_author(&connection, token.as_deref())? {
        Some(rated_by) => rated_by,
        None => return Ok(APIResult::forbidden()),
    };
    let post_exists: bool = diesel::select(diesel::dsl::exists(
        parking_posts::table.filter(parking_posts::id.eq(post_id)),
    ))
    .get_result(&*connection)?;
    if !post_exists {
        return Ok(APIResult::error(ErrorCode::NotFound));
    }
    insert_into(parking_ratings::table)
        .values((
            parking_ratings::post_id.eq(post_id),
            parking_ratings::user_id.eq(rated_by),
            parking_ratings::rating.eq(rating),
            parking_ratings::comment.eq(comment),
        ))
        .execute(&*connection)?;
    Ok(APIResult::success())
}

#[post("/rate")]
async fn rate_handler(
    state: web::Data<AppState>,
    payload: web::Json<RatePayload>,
) -> Result<impl Responder, GbbError> {
    let rating = match payload.rating {
        None => return Ok(common::error_response_with_code(ErrorCode::RatingNotSelected)),
        Some(rating) => rating,
    };
    if !(MIN_RATING..=MAX_RATING).contains(&rating) {
        return Ok(common::error_response_with_code(ErrorCode::RatingOutOfRange));
    }
    let comment = payload
        .0
        .comment
        .filter(|comment| !comment.trim().is_empty());
    let connection = state.db_pool.get()?;
    Ok(
        web::block(move || rate(connection, payload.0.token, payload.0.post_id, rating, comment))
            .await??
            .into_responder(),
    )
}

#[derive(Deserialize)]
struct EditPayload {
    token: String,
    post_id: i64,
    location: String,
    post_type: String,
    amt_slots: i32,
    content: String,
}

/// Editing stays owner-only; Council has no override on the edit path.
/// The owner-filtered update merges "missing" and "not yours" into one
/// refusal, revealing nothing about other users' posts.
fn edit<TCon: Deref<Target = DbConnection>>(
    connection: TCon,
    token: String,
    post_id: i64,
    location: String,
    post_type: String,
    amt_slots: i32,
    content: String,
) -> Result<APIResult, GbbError> {
    let user_id = match user::get_user_id(&connection, &token)? {
        Some(user_id) => user_id,
        None => return Ok(APIResult::forbidden()),
    };
    let affected = diesel::update(parking_posts::table)
        .filter(parking_posts::id.eq(post_id))
        .filter(parking_posts::created_by.eq(user_id))
        .set((
            parking_posts::location.eq(&location),
            parking_posts::post_type.eq(&post_type),
            parking_posts::amt_slots.eq(amt_slots),
            parking_posts::content.eq(&content),
        ))
        .execute(&*connection)?;
    if affected == 1 {
        Ok(APIResult::success())
    } else {
        Ok(APIResult::forbidden())
    }
}

#[post("/edit")]
async fn edit_handler(
    state: web::Data<AppState>,
    payload: web::Json<EditPayload>,
) -> Result<impl Responder, GbbError> {
    for (value, max, code) in [
        (&payload.location, MAX_LOCATION_BYTES, ErrorCode::ContentTooLong),
        (&payload.post_type, MAX_TYPE_BYTES, ErrorCode::ContentTooLong),
        (&payload.content, MAX_CONTENT_BYTES, ErrorCode::ContentTooLong),
    ] {
        if let Some(error_code) = common::validate_required_text(value, max, code) {
            return Ok(common::error_response_with_code(error_code));
        }
    }
    let connection = state.db_pool.get()?;
    Ok(web::block(move || {
        edit(
            connection,
            payload.0.token,
            payload.0.post_id,
            payload.0.location,
            payload.0.post_type,
            payload.0.amt_slots,
            payload.0.content,
        )
    })
    .await??
    .into_responder())
}

#[derive(Deserialize)]
struct DeletePayload {
    token: String,
    post_id: i64,
}

fn delete<TCon: Deref<Target = DbConnection>>(
    connection: TCon,
    token: String,
    post_id: i64,
) -> Result<APIResult, GbbError> {
    let acting_user = match user::get_user(&connection, &token)? {
        Some(acting_user) => acting_user,
        None => return Ok(APIResult::forbidden()),
    };
    connection.transaction::<APIResult, GbbError, _>(|| {
        let post: Option<ParkingPost> = parking_posts::table
            .filter(parking_posts::id.eq(post_id))
            .first(&*connection)
            .optional()?;
        let post = match post {
            Some(post) => post,
            None => return Ok(APIResult::error(ErrorCode::NotFound)),
        };
        let is_owner = post.created_by == Some(acting_user.id);
        if !role_of(&acting_user).can_delete_content(is_owner) {
            return Ok(APIResult::forbidden());
        }
        // Ratings never outlive their post.
        diesel::delete(parking_ratings::table)
            .filter(parking_ratings::post_id.eq(post_id))
            .execute(&*connection)?;
        diesel::delete(parking_posts::table)
            .filter(parking_posts::id.eq(post_id))
            .execute(&*connection)?;
        Ok(APIResult::success())
    })
}

#[post("/delete")]
async fn delete_handler(
    state: web::Data<AppState>,
    payload: web::Json<DeletePayload>,
) -> Result<impl Responder, GbbError> {
    let connection = state.db_pool.get()?;
    Ok(
        web::block(move || delete(connection, payload.0.token, payload.0.post_id))
            .await??
            .into_responder(),
    )
}

#[derive(Queryable)]
struct PostQueryResult {
    post: ParkingPost,
    username: Option<String>,
    display_name: Option<String>,
}

#[derive(Serialize)]
struct SinglePostResponse {
    id: i64,
    location: String,
    post_type: String,
    content: String,
    amt_slots: i32,
    created_at: i64,
    author: Option<AuthorResponse>,
    average_rating: Option<f64>,
    rating_count: usize,
}

fn load_posts<TCon: Deref<Target = DbConnection>>(
    connection: TCon,
) -> Result<Vec<SinglePostResponse>, GbbError> {
    let posts: Vec<PostQueryResult> = parking_posts::table
        .left_join(users::table)
        .select((
            parking_posts::table::all_columns(),
            users::username.nullable(),
            users::display_name.nullable(),
        ))
        .order_by(parking_posts::created_at.desc())
        .load(&*connection)?;
    let post_ids: Vec<i64> = posts.iter().map(|result| result.post.id).collect();
    let ratings: Vec<(i64, i16)> = parking_ratings::table
        .filter(parking_ratings::post_id.eq_any(post_ids))
        .select((parking_ratings::post_id, parking_ratings::rating))
        .load(&*connection)?;
    let mut ratings_by_post: HashMap<i64, Vec<i16>> = HashMap::new();
    for (post_id, rating) in ratings {
        ratings_by_post.entry(post_id).or_default().push(rating);
    }
    Ok(posts
        .into_iter()
        .map(|PostQueryResult { post, username, display_name }| {
            let post_ratings = ratings_by_post.remove(&post.id).unwrap_or_default();
            SinglePostResponse {
                id: post.id,
                location: post.location,
                post_type: post.post_type,
                content: post.content,
                amt_slots: post.amt_slots,
                created_at: post.created_at,
                author: author_response(username, display_name),
                average_rating: average_rating(&post_ratings),
                rating_count: post_ratings.len(),
            }
        })
        .collect())
}

#[get("/posts")]
async fn posts_handler(state: web::Data<AppState>) -> Result<impl Responder, GbbError> {
    let connection = state.db_pool.get()?;
    let posts = web::block(move || load_posts(connection)).await??;
    Ok(HttpResponse::Ok().json(posts))
}

#[derive(Deserialize)]
struct PostQuery {
    id: i64,
}

#[derive(Queryable)]
struct RatingQueryResult {
    rating: ParkingRating,
    username: Option<String>,
    display_name: Option<String>,
}

#[derive(Serialize)]
struct SingleRatingResponse {
    rating: i16,
    comment: Option<String>,
    by: Option<AuthorResponse>,
}

#[derive(Serialize)]
struct PostDetailResponse {
    #[serde(flatten)]
    post: SinglePostResponse,
    ratings: Vec<SingleRatingResponse>,
}

fn load_post<TCon: Deref<Target = DbConnection>>(
    connection: TCon,
    post_id: i64,
) -> Result<Option<PostDetailResponse>, GbbError> {
    let post: Option<PostQueryResult> = parking_posts::table
        .left_join(users::table)
        .select((
            parking_posts::table::all_columns(),
            users::username.nullable(),
            users::display_name.nullable(),
        ))
        .filter(parking_posts::id.eq(post_id))
        .first(&*connection)
        .optional()?;
    let PostQueryResult { post, username, display_name } = match post {
        Some(result) => result,
        None => return Ok(None),
    };
    let ratings: Vec<RatingQueryResult> = parking_ratings::table
        .left_join(users::table)
        .select((
            parking_ratings::table::all_columns(),
            users::username.nullable(),
            users::display_name.nullable(),
        ))
        .filter(parking_ratings::post_id.eq(post_id))
        .order_by(parking_ratings::id.desc())
        .load(&*connection)?;
    let rating_values: Vec<i16> = ratings.iter().map(|result| result.rating.rating).collect();
    Ok(Some(PostDetailResponse {
        post: SinglePostResponse {
            id: post.id,
            location: post.location,
            post_type: post.post_type,
            content: post.content,
            amt_slots: post.amt_slots,
            created_at: post.created_at,
            author: author_response(username, display_name),
            average_rating: average_rating(&rating_values),
            rating_count: rating_values.len(),
        },
        ratings: ratings
            .into_iter()
            .map(|RatingQueryResult { rating, username, display_name }| SingleRatingResponse {
                rating: rating.rating,
                comment: rating.comment,
                by: author_response(username, display_name),
            })
            .collect(),
    }))
}

#[get("/post")]
async fn post_handler(
    state: web::Data<AppState>,
    query: web::Query<PostQuery>,
) -> Result<impl Responder, GbbError> {
    let connection = state.db_pool.get()?;
    match web::block(move || load_post(connection, query.id)).await?? {
        Some(detail) => Ok(HttpResponse::Ok().json(detail)),
        None => Ok(common::error_response_with_code(ErrorCode::NotFound)),
    }
}

pub fn get_service() -> impl HttpServiceFactory {
    web::scope("/parking")
        .service(create_handler)
        .service(rate_handler)
        .service(edit_handler)
        .service(delete_handler)
        .service(posts_handler)
        .service(post_handler)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_ratings_means_no_average() {
        assert_eq!(average_rating(&[]), None);
    }

    #[test]
    fn average_is_mean_rounded_to_one_decimal() {
        assert_eq!(average_rating(&[4, 2]), Some(3.0));
        assert_eq!(average_rating(&[1, 2, 2]), Some(1.7));
        assert_eq!(average_rating(&[3, 4]), Some(3.5));
        assert_eq!(average_rating(&[5]), Some(5.0));
    }

    #[test]
    fn rating_bounds() {
        assert!((MIN_RATING..=MAX_RATING).contains(&1));
        assert!((MIN_RATING..=MAX_RATING).contains(&5));
        assert!(!(MIN_RATING..=MAX_RATING).contains(&0));
        assert!(!(MIN_RATING..=MAX_RATING).contains(&6));
    }
}
