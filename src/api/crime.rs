use std::ops::Deref;

use actix_web::dev::HttpServiceFactory;
use actix_web::{post, web, Responder};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, VarChar};
use diesel::{insert_into, sql_query};
use indoc::indoc;
use serde::{Deserialize, Serialize};

use crate::api::common;
use crate::api::common::{APIResult, ErrorCode};
use crate::api::user;
use crate::error::GbbError;
use crate::models::CrimeReport;
use crate::roles::role_of;
use crate::schema::{crime_reports, users};
use crate::{AppState, DbConnection};

const MAX_TITLE_BYTES: usize = 256;
const MAX_LOCATION_BYTES: usize = 256;
const MAX_CATEGORY_BYTES: usize = 64;
const MAX_DESCRIPTION_BYTES: usize = 4096;

const OTHER_CATEGORY: &str = "Other";

/// Case status. Every status is reachable from every other; "Closed" is
/// terminal in practice but not enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CrimeStatus {
    Pending,
    UnderInvestigation,
    ActionTaken,
    Closed,
}

impl CrimeStatus {
    fn as_str(self) -> &'static str {
        match self {
            CrimeStatus::Pending => "Pending",
            CrimeStatus::UnderInvestigation => "Under Investigation",
            CrimeStatus::ActionTaken => "Action Taken",
            CrimeStatus::Closed => "Closed",
        }
    }

    fn parse(value: &str) -> Option<CrimeStatus> {
        match value {
            "Pending" => Some(CrimeStatus::Pending),
            "Under Investigation" => Some(CrimeStatus::UnderInvestigation),
            "Action Taken" => Some(CrimeStatus::ActionTaken),
            "Closed" => Some(CrimeStatus::Closed),
            _ => None,
        }
    }
}

/// The "Other" category carries a free-text detail that is folded into the
/// stored description.
fn expand_description(
    category: &str,
    category_detail: Option<&str>,
    description: &str,
) -> Result<String, ErrorCode> {
    if category != OTHER_CATEGORY {
        return Ok(description.to_owned());
    }
    match category_detail.map(str::trim).filter(|detail| !detail.is_empty()) {
        Some(detail) => Ok(format!("{}: {}", detail, description)),
        None => Err(ErrorCode::CategoryDetailRequired),
    }
}

fn open_count(total: i64, closed: i64) -> i64 {
    total - closed
}

#[derive(Deserialize)]
struct ReportPayload {
    token: String,
    title: String,
    category: String,
    category_detail: Option<String>,
    location: String,
    description: String,
    is_emergency: bool,
}

#[derive(Serialize)]
struct ReportResponse {
    id: i64,
}

fn report<TCon: Deref<Target = DbConnection>>(
    connection: TCon,
    token: String,
    title: String,
    category: String,
    location: String,
    description: String,
    is_emergency: bool,
    current_timestamp: i64,
) -> Result<APIResult<ReportResponse>, GbbError> {
    let acting_user = match user::get_user(&connection, &token)? {
        Some(acting_user) => acting_user,
        None => return Ok(APIResult::forbidden()),
    };
    if !role_of(&acting_user).can_report_crime() {
        return Ok(APIResult::forbidden());
    }
    let crime_id: i64 = insert_into(crime_reports::table)
        .values((
            crime_reports::user_id.eq(acting_user.id),
            crime_reports::title.eq(&title),
            crime_reports::category.eq(&category),
            crime_reports::location.eq(&location),
            crime_reports::description.eq(&description),
            crime_reports::created_at.eq(current_timestamp),
            crime_reports::is_emergency.eq(is_emergency),
            crime_reports::status.eq(CrimeStatus::Pending.as_str()),
        ))
        .returning(crime_reports::id)
        .get_result(&*connection)?;
    Ok(APIResult::success_return(ReportResponse { id: crime_id }))
}

#[post("/report")]
async fn report_handler(
    state: web::Data<AppState>,
    payload: web::Json<ReportPayload>,
) -> Result<impl Responder, GbbError> {
    for (value, max) in [
        (&payload.title, MAX_TITLE_BYTES),
        (&payload.category, MAX_CATEGORY_BYTES),
        (&payload.location, MAX_LOCATION_BYTES),
        (&payload.description, MAX_DESCRIPTION_BYTES),
    ] {
        if let Some(error_code) = common::validate_required_text(value, max, ErrorCode::ContentTooLong)
        {
            return Ok(common::error_response_with_code(error_code));
        }
    }
    let description = match expand_description(
        &payload.category,
        payload.category_detail.as_deref(),
        &payload.description,
    ) {
        Ok(description) => description,
        Err(error_code) => return Ok(common::error_response_with_code(error_code)),
    };
    let connection = state.db_pool.get()?;
    let current_timestamp = common::get_current_timestamp();
    Ok(web::block(move || {
        report(
            connection,
            payload.0.token,
            payload.0.title,
            payload.0.category,
            payload.0.location,
            description,
            payload.0.is_emergency,
            current_timestamp,
        )
    })
    .await??
    .into_responder())
}

#[derive(Deserialize)]
struct FeedPayload {
    token: String,
    emergency_only: Option<bool>,
}

#[derive(Queryable)]
struct CrimeQueryResult {
    crime: CrimeReport,
    username: String,
    display_name: String,
}

#[derive(Serialize)]
struct ReporterResponse {
    username: String,
    display_name: String,
}

#[derive(Serialize)]
struct SingleCrimeResponse {
    id: i64,
    title: String,
    category: String,
    location: String,
    description: String,
    created_at: i64,
    is_emergency: bool,
    status: String,
    reporter: ReporterResponse,
}

#[derive(Serialize)]
struct CrimeFeedResponse {
    reports: Vec<SingleCrimeResponse>,
}

/// Police see every report (optionally only emergencies); a Power User sees
/// only their own; everyone else is refused.
fn feed<TCon: Deref<Target = DbConnection>>(
    connection: TCon,
    token: String,
    emergency_only: Option<bool>,
) -> Result<APIResult<CrimeFeedResponse>, GbbError> {
    let acting_user = match user::get_user(&connection, &token)? {
        Some(acting_user) => acting_user,
        None => return Ok(APIResult::forbidden()),
    };
    let role = role_of(&acting_user);
    let mut query = crime_reports::table
        .inner_join(users::table)
        .select((
            crime_reports::table::all_columns(),
            users::username,
            users::display_name,
        ))
        .order_by(crime_reports::created_at.desc())
        .into_boxed();
    if role.can_manage_crime() {
        if emergency_only == Some(true) {
            query = query.filter(crime_reports::is_emergency.eq(true));
        }
    } else if role.can_report_crime() {
        query = query.filter(crime_reports::user_id.eq(acting_user.id));
    } else {
        return Ok(APIResult::forbidden());
    }
    let results: Vec<CrimeQueryResult> = query.load(&*connection)?;
    Ok(APIResult::success_return(CrimeFeedResponse {
        reports: results
            .into_iter()
            .map(
                |CrimeQueryResult {
                     crime,
                     username,
                     display_name,
                 }| SingleCrimeResponse {
                    id: crime.id,
                    title: crime.title,
                    category: crime.category,
                    location: crime.location,
                    description: crime.description,
                    created_at: crime.created_at,
                    is_emergency: crime.is_emergency,
                    status: crime.status,
                    reporter: ReporterResponse {
                        username,
                        display_name,
                    },
                },
            )
            .collect(),
    }))
}

#[post("/feed")]
async fn feed_handler(
    state: web::Data<AppState>,
    payload: web::Json<FeedPayload>,
) -> Result<impl Responder, GbbError> {
    let connection = state.db_pool.get()?;
    Ok(
        web::block(move || feed(connection, payload.0.token, payload.0.emergency_only))
            .await??
            .into_responder(),
    )
}

#[derive(Deserialize)]
struct StatusPayload {
    token: String,
    crime_id: i64,
    status: String,
}

fn change_status<TCon: Deref<Target = DbConnection>>(
    connection: TCon,
    token: String,
    crime_id: i64,
    new_status: CrimeStatus,
) -> Result<APIResult, GbbError> {
    let acting_user = match user::get_user(&connection, &token)? {
        Some(acting_user) => acting_user,
        None => return Ok(APIResult::forbidden()),
    };
    if !role_of(&acting_user).can_manage_crime() {
        return Ok(APIResult::forbidden());
    }
    let affected = diesel::update(crime_reports::table)
        .filter(crime_reports::id.eq(crime_id))
        .set(crime_reports::status.eq(new_status.as_str()))
        .execute(&*connection)?;
    if affected == 1 {
        Ok(APIResult::success())
    } else {
        Ok(APIResult::error(ErrorCode::NotFound))
    }
}

#[post("/status")]
async fn status_handler(
    state: web::Data<AppState>,
    payload: web::Json<StatusPayload>,
) -> Result<impl Responder, GbbError> {
    let new_status = match CrimeStatus::parse(&payload.status) {
        Some(new_status) => new_status,
        None => return Ok(common::error_response_with_code(ErrorCode::UnknownStatus)),
    };
    let connection = state.db_pool.get()?;
    Ok(
        web::block(move || change_status(connection, payload.0.token, payload.0.crime_id, new_status))
            .await??
            .into_responder(),
    )
}

#[derive(Deserialize)]
struct DeletePayload {
    token: String,
    crime_id: i64,
}

fn delete<TCon: Deref<Target = DbConnection>>(
    connection: TCon,
    token: String,
    crime_id: i64,
) -> Result<APIResult, GbbError> {
    let acting_user = match user::get_user(&connection, &token)? {
        Some(acting_user) => acting_user,
        None => return Ok(APIResult::forbidden()),
    };
    let crime: Option<CrimeReport> = crime_reports::table
        .filter(crime_reports::id.eq(crime_id))
        .first(&*connection)
        .optional()?;
    let crime = match crime {
        Some(crime) => crime,
        None => return Ok(APIResult::error(ErrorCode::NotFound)),
    };
    let is_owner = crime.user_id == acting_user.id;
    if !is_owner && !role_of(&acting_user).can_manage_crime() {
        return Ok(APIResult::forbidden());
    }
    diesel::delete(crime_reports::table)
        .filter(crime_reports::id.eq(crime_id))
        .execute(&*connection)?;
    Ok(APIResult::success())
}

#[post("/delete")]
async fn delete_handler(
    state: web::Data<AppState>,
    payload: web::Json<DeletePayload>,
) -> Result<impl Responder, GbbError> {
    let connection = state.db_pool.get()?;
    Ok(
        web::block(move || delete(connection, payload.0.token, payload.0.crime_id))
            .await??
            .into_responder(),
    )
}

#[derive(Deserialize, Copy, Clone)]
#[serde(rename_all = "lowercase")]
enum StatsView {
    Location,
    Category,
}

#[derive(Deserialize)]
struct StatsPayload {
    token: String,
    view: StatsView,
}

#[derive(QueryableByName)]
struct CrimeStatsRow {
    #[sql_type = "VarChar"]
    group_key: String,
    #[sql_type = "BigInt"]
    total: i64,
    #[sql_type = "BigInt"]
    pending: i64,
    #[sql_type = "BigInt"]
    investigating: i64,
    #[sql_type = "BigInt"]
    action_taken: i64,
    #[sql_type = "BigInt"]
    closed: i64,
}

#[derive(Serialize)]
struct CrimeStatsResponse {
    group_key: String,
    total: i64,
    pending: i64,
    investigating: i64,
    action_taken: i64,
    closed: i64,
    open: i64,
}

#[derive(Serialize)]
struct CrimeStatsListResponse {
    groups: Vec<CrimeStatsResponse>,
}

fn stats<TCon: Deref<Target = DbConnection>>(
    connection: TCon,
    token: String,
    view: StatsView,
) -> Result<APIResult<CrimeStatsListResponse>, GbbError> {
    let acting_user = match user::get_user(&connection, &token)? {
        Some(acting_user) => acting_user,
        None => return Ok(APIResult::forbidden()),
    };
    if !role_of(&acting_user).can_view_crime_stats() {
        return Ok(APIResult::forbidden());
    }
    let sql = match view {
        StatsView::Location => indoc! {"
            SELECT location AS group_key,
                   COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE status = 'Pending') AS pending,
                   COUNT(*) FILTER (WHERE status = 'Under Investigation') AS investigating,
                   COUNT(*) FILTER (WHERE status = 'Action Taken') AS action_taken,
                   COUNT(*) FILTER (WHERE status = 'Closed') AS closed
                FROM crime_reports
                GROUP BY location
                ORDER BY COUNT(*) - COUNT(*) FILTER (WHERE status = 'Closed') DESC
        "},
        StatsView::Category => indoc! {"
            SELECT category AS group_key,
                   COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE status = 'Pending') AS pending,
                   COUNT(*) FILTER (WHERE status = 'Under Investigation') AS investigating,
                   COUNT(*) FILTER (WHERE status = 'Action Taken') AS action_taken,
                   COUNT(*) FILTER (WHERE status = 'Closed') AS closed
                FROM crime_reports
                GROUP BY category
                ORDER BY COUNT(*) - COUNT(*) FILTER (WHERE status = 'Closed') DESC
        "},
    };
    let rows: Vec<CrimeStatsRow> = sql_query(sql).get_results(&*connection)?;
    Ok(APIResult::success_return(CrimeStatsListResponse {
        groups: rows
            .into_iter()
            .map(|row| CrimeStatsResponse {
                open: open_count(row.total, row.closed),
                group_key: row.group_key,
                total: row.total,
                pending: row.pending,
                investigating: row.investigating,
                action_taken: row.action_taken,
                closed: row.closed,
            })
            .collect(),
    }))
}

#[post("/stats")]
async fn stats_handler(
    state: web::Data<AppState>,
    payload: web::Json<StatsPayload>,
) -> Result<impl Responder, GbbError> {
    let connection = state.db_pool.get()?;
    Ok(
        web::block(move || stats(connection, payload.0.token, payload.0.view))
            .await??
            .into_responder(),
    )
}

pub fn get_service() -> impl HttpServiceFactory {
    web::scope("/crime")
        .service(report_handler)
        .service(feed_handler)
        .service(status_handler)
        .service(delete_handler)
        .service(stats_handler)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for status in [
            CrimeStatus::Pending,
            CrimeStatus::UnderInvestigation,
            CrimeStatus::ActionTaken,
            CrimeStatus::Closed,
        ] {
            assert_eq!(CrimeStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(CrimeStatus::parse("Resolved"), None);
        assert_eq!(CrimeStatus::parse("pending"), None);
    }

    #[test]
    fn other_category_requires_a_detail() {
        assert_eq!(
            expand_description("Other", None, "bike stolen"),
            Err(ErrorCode::CategoryDetailRequired)
        );
        assert_eq!(
            expand_description("Other", Some("  "), "bike stolen"),
            Err(ErrorCode::CategoryDetailRequired)
        );
        assert_eq!(
            expand_description("Other", Some("Vandalism"), "bike stolen"),
            Ok("Vandalism: bike stolen".to_owned())
        );
    }

    #[test]
    fn named_categories_pass_through() {
        assert_eq!(
            expand_description("Theft", None, "bike stolen"),
            Ok("bike stolen".to_owned())
        );
    }

    #[test]
    fn open_cases_exclude_closed_ones() {
        assert_eq!(open_count(10, 4), 6);
        assert_eq!(open_count(3, 3), 0);
    }
}
