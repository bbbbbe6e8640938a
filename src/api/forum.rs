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
use crate::models::{ContentReport, Thread};
use crate::roles::role_of;
use crate::schema::{content_reports, roles, threads, users};
use crate::{AppState, DbConnection};

pub const MAX_TITLE_BYTES: usize = 256;
pub const MAX_CONTENT_BYTES: usize = 4096;
pub const MAX_REASON_BYTES: usize = 1024;

fn comment_title(author: &str, parent_title: &str) -> String {
    format!("Comment by {} to thread: {}", author, parent_title)
}

/// How believable the flagged content is, as surfaced to moderators next to
/// its flag count.
fn credibility(up_votes: i32, down_votes: i32) -> i32 {
    up_votes - down_votes
}

#[derive(Deserialize, Copy, Clone)]
#[serde(rename_all = "lowercase")]
enum VoteDirection {
    Up,
    Down,
}

#[derive(Serialize)]
struct ForumAuthorResponse {
    username: String,
    display_name: String,
    role_name: String,
    badge_color: String,
    avatar_url: String,
}

#[derive(Queryable)]
struct ThreadQueryResult {
    thread: Thread,
    username: String,
    display_name: String,
    role_name: String,
    role_color: String,
}

#[derive(Serialize)]
struct SingleThreadResponse {
    id: i64,
    title: String,
    content: String,
    created_at: i64,
    up_votes: i32,
    down_votes: i32,
    flags: i32,
    credibility: i32,
    author: ForumAuthorResponse,
}

fn convert_thread_query_result(result: ThreadQueryResult) -> SingleThreadResponse {
    let ThreadQueryResult {
        thread,
        username,
        display_name,
        role_name,
        role_color,
    } = result;
    let avatar_url = common::avatar_url(&display_name, &username);
    SingleThreadResponse {
        id: thread.id,
        title: thread.title,
        content: thread.content,
        created_at: thread.created_at,
        up_votes: thread.up_votes,
        down_votes: thread.down_votes,
        flags: thread.flags,
        credibility: credibility(thread.up_votes, thread.down_votes),
        author: ForumAuthorResponse {
            username,
            display_name,
            role_name,
            badge_color: role_color,
            avatar_url,
        },
    }
}

#[derive(Deserialize)]
struct CreatePayload {
    token: String,
    title: String,
    content: String,
}

#[derive(Serialize)]
struct CreateResponse {
    id: i64,
}

fn create<TCon: Deref<Target = DbConnection>>(
    connection: TCon,
    token: String,
    title: String,
    content: String,
    current_timestamp: i64,
) -> Result<APIResult<CreateResponse>, GbbError> {
    let acting_user = match user::get_user(&connection, &token)? {
        Some(acting_user) => acting_user,
        None => return Ok(APIResult::forbidden()),
    };
    let thread_id: i64 = insert_into(threads::table)
        .values((
            threads::user_id.eq(acting_user.id),
            threads::title.eq(&title),
            threads::content.eq(&content),
            threads::created_at.eq(current_timestamp),
        ))
        .returning(threads::id)
        .get_result(&*connection)?;
    Ok(APIResult::success_return(CreateResponse { id: thread_id }))
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
    let connection = state.db_pool.get()?;
    let current_timestamp = common::get_current_timestamp();
    Ok(web::block(move || {
        create(
            connection,
            payload.0.token,
            payload.0.title,
            payload.0.content,
            current_timestamp,
        )
    })
    .await??
    .into_responder())
}

#[derive(Deserialize)]
struct CommentPayload {
    token: String,
    thread_id: i64,
    content: String,
}

fn comment<TCon: Deref<Target = DbConnection>>(
    connection: TCon,
    token: String,
    parent_thread_id: i64,
    content: String,
    current_timestamp: i64,
) -> Result<APIResult<CreateResponse>, GbbError> {
    let acting_user = match user::get_user(&connection, &token)? {
        Some(acting_user) => acting_user,
        None => return Ok(APIResult::forbidden()),
    };
    let parent: Option<Thread> = threads::table
        .filter(threads::id.eq(parent_thread_id))
        .first(&*connection)
        .optional()?;
    let parent = match parent {
        Some(parent) => parent,
        None => return Ok(APIResult::error(ErrorCode::NotFound)),
    };
    // Comments attach to root threads only; a comment is never itself a
    // commentable unit.
    if parent.parent_id.is_some() {
        return Ok(APIResult::error(ErrorCode::NotFound));
    }
    let comment_id: i64 = insert_into(threads::table)
        .values((
            threads::user_id.eq(acting_user.id),
            threads::title.eq(comment_title(&acting_user.display_name, &parent.title)),
            threads::content.eq(&content),
            threads::parent_id.eq(parent.id),
            threads::created_at.eq(current_timestamp),
        ))
        .returning(threads::id)
        .get_result(&*connection)?;
    Ok(APIResult::success_return(CreateResponse { id: comment_id }))
}

#[post("/comment")]
async fn comment_handler(
    state: web::Data<AppState>,
    payload: web::Json<CommentPayload>,
) -> Result<impl Responder, GbbError> {
    if let Some(error_code) =
        common::validate_required_text(&payload.content, MAX_CONTENT_BYTES, ErrorCode::ContentTooLong)
    {
        return Ok(common::error_response_with_code(error_code));
    }
    let connection = state.db_pool.get()?;
    let current_timestamp = common::get_current_timestamp();
    Ok(web::block(move || {
        comment(
            connection,
            payload.0.token,
            payload.0.thread_id,
            payload.0.content,
            current_timestamp,
        )
    })
    .await??
    .into_responder())
}

#[derive(Deserialize)]
struct EditPayload {
    token: String,
    thread_id: i64,
    title: Option<String>,
    content: String,
}

/// Editing is for correcting one's own text: owner only, no Council
/// override. A comment keeps its synthesized title.
fn edit<TCon: Deref<Target = DbConnection>>(
    connection: TCon,
    token: String,
    thread_id: i64,
    title: Option<String>,
    content: String,
) -> Result<APIResult, GbbError> {
    let acting_user = match user::get_user(&connection, &token)? {
        Some(acting_user) => acting_user,
        None => return Ok(APIResult::forbidden()),
    };
    let thread: Option<Thread> = threads::table
        .filter(threads::id.eq(thread_id))
        .first(&*connection)
        .optional()?;
    let thread = match thread {
        Some(thread) => thread,
        None => return Ok(APIResult::error(ErrorCode::NotFound)),
    };
    if thread.user_id != acting_user.id {
        return Ok(APIResult::forbidden());
    }
    match title {
        Some(title) if thread.parent_id.is_none() => {
            diesel::update(&thread)
                .set((threads::title.eq(&title), threads::content.eq(&content)))
                .execute(&*connection)?;
        }
        _ => {
            diesel::update(&thread)
                .set(threads::content.eq(&content))
                .execute(&*connection)?;
        }
    }
    Ok(APIResult::success())
}

#[post("/edit")]
async fn edit_handler(
    state: web::Data<AppState>,
    payload: web::Json<EditPayload>,
) -> Result<impl Responder, GbbError> {
    if let Some(title) = &payload.title {
        if let Some(error_code) =
            common::validate_required_text(title, MAX_TITLE_BYTES, ErrorCode::TitleTooLong)
        {
            return Ok(common::error_response_with_code(error_code));
        }
    }
    if let Some(error_code) =
        common::validate_required_text(&payload.content, MAX_CONTENT_BYTES, ErrorCode::ContentTooLong)
    {
        return Ok(common::error_response_with_code(error_code));
    }
    let connection = state.db_pool.get()?;
    Ok(web::block(move || {
        edit(
            connection,
            payload.0.token,
            payload.0.thread_id,
            payload.0.title,
            payload.0.content,
        )
    })
    .await??
    .into_responder())
}

#[derive(Deserialize)]
struct DeletePayload {
    token: String,
    thread_id: i64,
}

fn delete<TCon: Deref<Target = DbConnection>>(
    connection: TCon,
    token: String,
    thread_id: i64,
) -> Result<APIResult, GbbError> {
    let acting_user = match user::get_user(&connection, &token)? {
        Some(acting_user) => acting_user,
        None => return Ok(APIResult::forbidden()),
    };
    connection.transaction::<APIResult, GbbError, _>(|| {
        let thread: Option<Thread> = threads::table
            .filter(threads::id.eq(thread_id))
            .first(&*connection)
            .optional()?;
        let thread = match thread {
            Some(thread) => thread,
            None => return Ok(APIResult::error(ErrorCode::NotFound)),
        };
        let is_owner = thread.user_id == acting_user.id;
        if !role_of(&acting_user).can_delete_content(is_owner) {
            return Ok(APIResult::forbidden());
        }
        // Comments and reports never outlive the thread they reference,
        // including reports filed against the thread's comments.
        let comment_ids: Vec<i64> = threads::table
            .filter(threads::parent_id.eq(thread_id))
            .select(threads::id)
            .load(&*connection)?;
        diesel::delete(content_reports::table)
            .filter(content_reports::thread_id.eq(thread_id))
            .execute(&*connection)?;
        diesel::delete(content_reports::table)
            .filter(content_reports::thread_id.eq_any(&comment_ids))
            .execute(&*connection)?;
        diesel::delete(threads::table)
            .filter(threads::parent_id.eq(thread_id))
            .execute(&*connection)?;
        diesel::delete(threads::table)
            .filter(threads::id.eq(thread_id))
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
        web::block(move || delete(connection, payload.0.token, payload.0.thread_id))
            .await??
            .into_responder(),
    )
}

#[derive(Deserialize)]
struct VotePayload {
    token: String,
    thread_id: i64,
    direction: VoteDirection,
}

fn vote<TCon: Deref<Target = DbConnection>>(
    connection: TCon,
    token: String,
    thread_id: i64,
    direction: VoteDirection,
) -> Result<APIResult, GbbError> {
    // An unauthenticated vote leaves the counters untouched.
    if user::get_user_id(&connection, &token)?.is_none() {
        return Ok(APIResult::forbidden());
    }
    let affected = match direction {
        VoteDirection::Up => diesel::update(threads::table)
            .filter(threads::id.eq(thread_id))
            .set(threads::up_votes.eq(threads::up_votes + 1))
            .execute(&*connection)?,
        VoteDirection::Down => diesel::update(threads::table)
            .filter(threads::id.eq(thread_id))
            .set(threads::down_votes.eq(threads::down_votes + 1))
            .execute(&*connection)?,
    };
    if affected == 1 {
        Ok(APIResult::success())
    } else {
        Ok(APIResult::error(ErrorCode::NotFound))
    }
}

#[post("/vote")]
async fn vote_handler(
    state: web::Data<AppState>,
    payload: web::Json<VotePayload>,
) -> Result<impl Responder, GbbError> {
    let connection = state.db_pool.get()?;
    Ok(web::block(move || {
        vote(
            connection,
            payload.0.token,
            payload.0.thread_id,
            payload.0.direction,
        )
    })
    .await??
    .into_responder())
}

#[derive(Deserialize)]
struct ReportPayload {
    token: String,
    thread_id: i64,
    reason: String,
}

fn report<TCon: Deref<Target = DbConnection>>(
    connection: TCon,
    token: String,
    thread_id: i64,
    reason: String,
    current_timestamp: i64,
) -> Result<APIResult, GbbError> {
    let acting_user = match user::get_user(&connection, &token)? {
        Some(acting_user) => acting_user,
        None => return Ok(APIResult::forbidden()),
    };
    connection.transaction::<APIResult, GbbError, _>(|| {
        let thread: Option<Thread> = threads::table
            .filter(threads::id.eq(thread_id))
            .first(&*connection)
            .optional()?;
        let thread = match thread {
            Some(thread) => thread,
            None => return Ok(APIResult::error(ErrorCode::NotFound)),
        };
        if thread.user_id == acting_user.id {
            return Ok(APIResult::error(ErrorCode::SelfReport));
        }
        insert_into(content_reports::table)
            .values((
                content_reports::user_id.eq(acting_user.id),
                content_reports::thread_id.eq(thread.id),
                content_reports::comment.eq(&reason),
                content_reports::created_at.eq(current_timestamp),
            ))
            .execute(&*connection)?;
        // flags mirrors the number of reports filed against the thread; it
        // only ever goes away together with the thread itself.
        diesel::update(threads::table)
            .filter(threads::id.eq(thread.id))
            .set(threads::flags.eq(threads::flags + 1))
            .execute(&*connection)?;
        Ok(APIResult::success())
    })
}

#[post("/report")]
async fn report_handler(
    state: web::Data<AppState>,
    payload: web::Json<ReportPayload>,
) -> Result<impl Responder, GbbError> {
    if let Some(error_code) =
        common::validate_required_text(&payload.reason, MAX_REASON_BYTES, ErrorCode::ContentTooLong)
    {
        return Ok(common::error_response_with_code(error_code));
    }
    let connection = state.db_pool.get()?;
    let current_timestamp = common::get_current_timestamp();
    Ok(web::block(move || {
        report(
            connection,
            payload.0.token,
            payload.0.thread_id,
            payload.0.reason,
            current_timestamp,
        )
    })
    .await??
    .into_responder())
}

#[derive(Deserialize)]
struct ReportsPayload {
    token: String,
    thread_id: Option<i64>,
}

#[derive(Queryable)]
struct ReportQueryResult {
    report: ContentReport,
    username: String,
    display_name: String,
    thread_title: String,
}

#[derive(Serialize)]
struct ReporterResponse {
    username: String,
    display_name: String,
}

#[derive(Serialize)]
struct SingleReportResponse {
    id: i64,
    thread_id: i64,
    thread_title: String,
    reason: String,
    created_at: i64,
    reporter: ReporterResponse,
}

#[derive(Serialize)]
struct ReportsResponse {
    reports: Vec<SingleReportResponse>,
}

fn list_reports<TCon: Deref<Target = DbConnection>>(
    connection: TCon,
    token: String,
    thread_id: Option<i64>,
) -> Result<APIResult<ReportsResponse>, GbbError> {
    let acting_user = match user::get_user(&connection, &token)? {
        Some(acting_user) => acting_user,
        None => return Ok(APIResult::forbidden()),
    };
    if !role_of(&acting_user).can_moderate_content() {
        return Ok(APIResult::forbidden());
    }
    let mut query = content_reports::table
        .inner_join(users::table)
        .inner_join(threads::table)
        .select((
            content_reports::table::all_columns(),
            users::username,
            users::display_name,
            threads::title,
        ))
        .order_by(content_reports::created_at.desc())
        .into_boxed();
    if let Some(thread_id) = thread_id {
        query = query.filter(content_reports::thread_id.eq(thread_id));
    }
    let reports: Vec<ReportQueryResult> = query.load(&*connection)?;
    Ok(APIResult::success_return(ReportsResponse {
        reports: reports
            .into_iter()
            .map(
                |ReportQueryResult {
                     report,
                     username,
                     display_name,
                     thread_title,
                 }| SingleReportResponse {
                    id: report.id,
                    thread_id: report.thread_id,
                    thread_title,
                    reason: report.comment,
                    created_at: report.created_at,
                    reporter: ReporterResponse {
                        username,
                        display_name,
                    },
                },
            )
            .collect(),
    }))
}

#[post("/reports")]
async fn reports_handler(
    state: web::Data<AppState>,
    payload: web::Json<ReportsPayload>,
) -> Result<impl Responder, GbbError> {
    let connection = state.db_pool.get()?;
    Ok(
        web::block(move || list_reports(connection, payload.0.token, payload.0.thread_id))
            .await??
            .into_responder(),
    )
}

#[derive(Deserialize)]
struct FlaggedPayload {
    token: String,
}

#[derive(Serialize)]
struct FlaggedThreadResponse {
    id: i64,
    title: String,
    flags: i32,
    up_votes: i32,
    down_votes: i32,
    credibility: i32,
}

#[derive(Serialize)]
struct FlaggedResponse {
    threads: Vec<FlaggedThreadResponse>,
}

fn flagged<TCon: Deref<Target = DbConnection>>(
    connection: TCon,
    token: String,
) -> Result<APIResult<FlaggedResponse>, GbbError> {
    let acting_user = match user::get_user(&connection, &token)? {
        Some(acting_user) => acting_user,
        None => return Ok(APIResult::forbidden()),
    };
    if !role_of(&acting_user).can_moderate_content() {
        return Ok(APIResult::forbidden());
    }
    let flagged_threads: Vec<Thread> = threads::table
        .filter(threads::flags.gt(0))
        .order_by(threads::flags.desc())
        .load(&*connection)?;
    Ok(APIResult::success_return(FlaggedResponse {
        threads: flagged_threads
            .into_iter()
            .map(|thread| FlaggedThreadResponse {
                id: thread.id,
                title: thread.title,
                flags: thread.flags,
                up_votes: thread.up_votes,
                down_votes: thread.down_votes,
                credibility: credibility(thread.up_votes, thread.down_votes),
            })
            .collect(),
    }))
}

#[post("/flagged")]
async fn flagged_handler(
    state: web::Data<AppState>,
    payload: web::Json<FlaggedPayload>,
) -> Result<impl Responder, GbbError> {
    let connection = state.db_pool.get()?;
    Ok(web::block(move || flagged(connection, payload.0.token))
        .await??
        .into_responder())
}

fn load_threads<TCon: Deref<Target = DbConnection>>(
    connection: TCon,
) -> Result<Vec<SingleThreadResponse>, GbbError> {
    let results: Vec<ThreadQueryResult> = threads::table
        .inner_join(users::table.inner_join(roles::table))
        .select((
            threads::table::all_columns(),
            users::username,
            users::display_name,
            roles::name,
            roles::color,
        ))
        .filter(threads::parent_id.is_null())
        .order_by(threads::created_at.desc())
        .load(&*connection)?;
    Ok(results.into_iter().map(convert_thread_query_result).collect())
}

#[get("/threads")]
async fn threads_handler(state: web::Data<AppState>) -> Result<impl Responder, GbbError> {
    let connection = state.db_pool.get()?;
    let results = web::block(move || load_threads(connection)).await??;
    Ok(HttpResponse::Ok().json(results))
}

#[derive(Deserialize)]
struct ThreadQuery {
    id: i64,
}

#[derive(Serialize)]
struct ThreadDetailResponse {
    #[serde(flatten)]
    thread: SingleThreadResponse,
    comments: Vec<SingleThreadResponse>,
}

fn load_thread<TCon: Deref<Target = DbConnection>>(
    connection: TCon,
    thread_id: i64,
) -> Result<Option<ThreadDetailResponse>, GbbError> {
    let root: Option<ThreadQueryResult> = threads::table
        .inner_join(users::table.inner_join(roles::table))
        .select((
            threads::table::all_columns(),
            users::username,
            users::display_name,
            roles::name,
            roles::color,
        ))
        .filter(threads::id.eq(thread_id))
        .filter(threads::parent_id.is_null())
        .first(&*connection)
        .optional()?;
    let root = match root {
        Some(root) => root,
        None => return Ok(None),
    };
    let comments: Vec<ThreadQueryResult> = threads::table
        .inner_join(users::table.inner_join(roles::table))
        .select((
            threads::table::all_columns(),
            users::username,
            users::display_name,
            roles::name,
            roles::color,
        ))
        .filter(threads::parent_id.eq(thread_id))
        .order_by(threads::created_at.asc())
        .load(&*connection)?;
    Ok(Some(ThreadDetailResponse {
        thread: convert_thread_query_result(root),
        comments: comments.into_iter().map(convert_thread_query_result).collect(),
    }))
}

#[get("/thread")]
async fn thread_handler(
    state: web::Data<AppState>,
    query: web::Query<ThreadQuery>,
) -> Result<impl Responder, GbbError> {
    let connection = state.db_pool.get()?;
    match web::block(move || load_thread(connection, query.id)).await?? {
        Some(detail) => Ok(HttpResponse::Ok().json(detail)),
        None => Ok(common::error_response_with_code(ErrorCode::NotFound)),
    }
}

pub fn get_service() -> impl HttpServiceFactory {
    web::scope("/forum")
        .service(create_handler)
        .service(comment_handler)
        .service(edit_handler)
        .service(delete_handler)
        .service(vote_handler)
        .service(report_handler)
        .service(reports_handler)
        .service(flagged_handler)
        .service(threads_handler)
        .service(thread_handler)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comment_titles_follow_the_parent() {
        assert_eq!(
            comment_title("Pat Smith", "Bike racks at Trinity Square"),
            "Comment by Pat Smith to thread: Bike racks at Trinity Square"
        );
    }

    #[test]
    fn credibility_is_votes_for_minus_votes_against() {
        assert_eq!(credibility(0, 0), 0);
        assert_eq!(credibility(5, 2), 3);
        assert_eq!(credibility(1, 4), -3);
    }
}
