use crate::schema::content_reports;
use crate::schema::crime_reports;
use crate::schema::notifications;
use crate::schema::parking_posts;
use crate::schema::parking_ratings;
use crate::schema::threads;
use crate::schema::users;

#[derive(Identifiable, Queryable)]
pub struct User {
    pub id: i64,
    pub token: String,
    pub username: String,
    pub display_name: String,
    pub password: String,
    pub role_id: i32,
}

#[derive(Identifiable, Queryable)]
pub struct ParkingPost {
    pub id: i64,
    pub created_by: Option<i64>,
    pub location: String,
    pub post_type: String,
    pub content: String,
    pub amt_slots: i32,
    pub created_at: i64,
}

#[derive(Identifiable, Queryable)]
pub struct ParkingRating {
    pub id: i64,
    pub post_id: i64,
    pub user_id: Option<i64>,
    pub rating: i16,
    pub comment: Option<String>,
}

/// A row of the `threads` table is either a root thread (`parent_id` is
/// `None`) or a comment attached to a root thread (`parent_id` is `Some`).
/// Comments are never listed as browsable top-level content.
#[derive(Identifiable, Queryable)]
pub struct Thread {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub content: String,
    pub parent_id: Option<i64>,
    pub created_at: i64,
    pub up_votes: i32,
    pub down_votes: i32,
    pub flags: i32,
}

#[derive(Identifiable, Queryable)]
pub struct ContentReport {
    pub id: i64,
    pub user_id: i64,
    pub thread_id: i64,
    pub comment: String,
    pub created_at: i64,
}

#[derive(Identifiable, Queryable)]
pub struct CrimeReport {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub category: String,
    pub location: String,
    pub description: String,
    pub created_at: i64,
    pub is_emergency: bool,
    pub status: String,
}

#[derive(Identifiable, Queryable)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub by_role_id: i32,
    pub title: String,
    pub content: String,
    pub created_at: i64,
    pub category: String,
    pub status: String,
}
