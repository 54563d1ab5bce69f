use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

/// Build a tide response.
///
/// `resp!(json => value)` serializes `value` with a 200,
/// `resp!(status => 201, json => value)` picks the status, and
/// `resp!(status => 400, message => "...")` returns `{"message": ...}`.
macro_rules! resp {
    (json => $obj:expr) => {{
        tide::Response::builder(200)
            .body(tide::Body::from_json(&$obj)?)
            .build()
    }};
    (status => $status:expr, json => $obj:expr) => {{
        tide::Response::builder($status)
            .body(tide::Body::from_json(&$obj)?)
            .build()
    }};
    (status => $status:expr, message => $msg:expr) => {{
        tide::Response::builder($status)
            .body(serde_json::json!({ "message": $msg }))
            .build()
    }};
}

/// Absolute expiry for a provider token that is valid for
/// `expires_in` seconds starting now.
pub fn expiry_from_now(expires_in: i64) -> DateTime<Utc> {
    expiry_from(Utc::now(), expires_in)
}

pub fn expiry_from(now: DateTime<Utc>, expires_in: i64) -> DateTime<Utc> {
    now + Duration::seconds(expires_in)
}

/// Whole weeks elapsed since January 1st of `date`'s year.
pub fn week_number(date: NaiveDate) -> u32 {
    date.ordinal0() / 7
}

/// `M/D/YYYY`, no zero padding.
pub fn short_date(date: NaiveDate) -> String {
    format!("{}/{}/{}", date.month(), date.day(), date.year())
}
