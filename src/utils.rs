use chrono::NaiveDateTime;
use rocket::http::Status;
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use rocket::serde::json::{Json, Value};
use serde::Serializer;

const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

pub fn try_respond<'r>(req: &'r Request<'_>, json: Value, status: Status) -> response::Result<'static> {
    Response::build_from(Json(json).respond_to(req)?)
        .status(status)
        .ok()
}

/// Timestamps are stored as naive UTC.
pub fn format_date(date: &NaiveDateTime) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn serialize_date<S>(date: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_date(date))
}
