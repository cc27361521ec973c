//! Scheduled data model builds

use super::AccessManagement;
use crate::client::path_segment;
use crate::datamodel::datamodel_oid;
use crate::error::{Result, SdkError};
use serde_json::{json, Value};
use tracing::{info, warn};

/// Build type used when none is given
pub const DEFAULT_BUILD_TYPE: &str = "ACCUMULATE";

const DAY_CODES: [(&str, u8); 7] = [
    ("SUN", 0),
    ("MON", 1),
    ("TUE", 2),
    ("WED", 3),
    ("THU", 4),
    ("FRI", 5),
    ("SAT", 6),
];

/// When a build runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleSpec {
    /// Every `days`/`hours`/`minutes`, summed
    Interval { days: u64, hours: u64, minutes: u64 },
    /// On the given week days (`SUN`..`SAT`, or `*` for all) at a UTC time
    Cron {
        days: Vec<String>,
        hour: u8,
        minute: u8,
    },
}

impl ScheduleSpec {
    /// Interval schedule
    pub fn interval(days: u64, hours: u64, minutes: u64) -> Self {
        Self::Interval { days, hours, minutes }
    }

    /// Cron schedule
    pub fn cron(days: Vec<String>, hour: u8, minute: u8) -> Self {
        Self::Cron { days, hour, minute }
    }

    /// Request body for the schedule endpoint
    pub fn payload(&self, build_type: &str) -> Result<Value> {
        match self {
            Self::Interval { days, hours, minutes } => {
                let seconds = days * 86_400 + hours * 3_600 + minutes * 60;
                if seconds == 0 {
                    return Err(SdkError::invalid("interval must be greater than 0 seconds"));
                }
                Ok(json!({
                    "scheduleType": "Interval",
                    "buildType": build_type,
                    "intervalSeconds": seconds,
                }))
            }
            Self::Cron { days, hour, minute } => {
                if *hour > 23 || *minute > 59 {
                    return Err(SdkError::invalid(format!("invalid time {}:{:02}", hour, minute)));
                }
                Ok(json!({
                    "cronString": format!("{} {} * * {}", minute, hour, cron_days(days)?),
                    "buildType": build_type,
                    "daysOfWeek": days,
                    "hour": hour,
                    "minute": minute,
                }))
            }
        }
    }
}

/// Week day list for a cron expression: `["MON","WED"]` -> `1,3`, `["*"]` -> `0,1,2,3,4,5,6`
pub fn cron_days(days: &[String]) -> Result<String> {
    if days.is_empty() {
        return Err(SdkError::invalid("cron schedule needs at least one day"));
    }
    if days.len() == 1 && days[0] == "*" {
        return Ok("0,1,2,3,4,5,6".to_string());
    }
    let codes = days
        .iter()
        .map(|day| {
            let upper = day.to_uppercase();
            DAY_CODES
                .iter()
                .find(|(name, _)| *name == upper)
                .map(|(_, code)| code.to_string())
                .ok_or_else(|| SdkError::invalid(format!("unknown day '{}'", day)))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(codes.join(","))
}

impl AccessManagement {
    /// Create a build schedule for a data model. `build_type` defaults to `ACCUMULATE`.
    pub async fn create_schedule_build(
        &self,
        datamodel_name: &str,
        schedule: &ScheduleSpec,
        build_type: Option<&str>,
    ) -> Result<Value> {
        let payload = schedule.payload(build_type.unwrap_or(DEFAULT_BUILD_TYPE))?;
        let api = self.api();
        let datamodel_id = datamodel_oid(api, datamodel_name).await?;

        let endpoint = format!("/api/v2/datamodels/{}/schedule", path_segment(&datamodel_id));
        let response = api
            .post(&endpoint, &payload)
            .await?
            .expect_status(&endpoint, &[200, 201])?;
        info!(datamodel = datamodel_name, "schedule build created");

        match response.value() {
            Ok(value) => Ok(value),
            Err(_) => {
                warn!("schedule response is not JSON, returning the raw text");
                Ok(json!({
                    "message": "Schedule build created successfully",
                    "raw_response": response.text(),
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockTransport;
    use crate::client::HttpMethod;
    use std::sync::Arc;

    fn days(list: &[&str]) -> Vec<String> {
        list.iter().map(|d| d.to_string()).collect()
    }

    #[test]
    fn test_interval_payload() {
        let payload = ScheduleSpec::interval(1, 2, 30).payload("FULL").unwrap();
        assert_eq!(payload["intervalSeconds"], 86_400 + 7_200 + 1_800);
        assert_eq!(payload["scheduleType"], "Interval");
        assert!(ScheduleSpec::interval(0, 0, 0).payload("FULL").is_err());
    }

    #[test]
    fn test_cron_payload() {
        let payload = ScheduleSpec::cron(days(&["MON", "fri"]), 9, 5)
            .payload(DEFAULT_BUILD_TYPE)
            .unwrap();
        assert_eq!(payload["cronString"], "5 9 * * 1,5");
        assert_eq!(payload["daysOfWeek"], json!(["MON", "fri"]));

        let every = ScheduleSpec::cron(days(&["*"]), 0, 0).payload("FULL").unwrap();
        assert_eq!(every["cronString"], "0 0 * * 0,1,2,3,4,5,6");
    }

    #[test]
    fn test_cron_validation() {
        assert!(cron_days(&[]).is_err());
        assert!(cron_days(&days(&["FUNDAY"])).is_err());
        assert!(ScheduleSpec::cron(days(&["MON"]), 24, 0).payload("FULL").is_err());
    }

    #[tokio::test]
    async fn test_create_schedule_build() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(
            HttpMethod::Get,
            "/api/v2/datamodels/schema?title=Commerce",
            200,
            json!({"oid": "dm1"}),
        );
        mock.respond_text(HttpMethod::Post, "/api/v2/datamodels/dm1/schedule", 201, "created");
        let access = AccessManagement::new(mock.clone());
        let result = access
            .create_schedule_build("Commerce", &ScheduleSpec::interval(0, 6, 0), None)
            .await
            .unwrap();
        assert_eq!(result["raw_response"], "created");

        let post = mock.calls().into_iter().find(|c| c.method == HttpMethod::Post).unwrap();
        assert_eq!(post.body.unwrap()["buildType"], "ACCUMULATE");
    }
}
