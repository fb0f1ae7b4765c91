//! Turning raw submission strings into typed run parameters.

use chrono::NaiveDate;
use firwatch_server::JobServiceError;
use thiserror::Error;

use crate::districts::DistrictDirectory;
use crate::pipeline::{PORTAL_DATE_FORMAT, RunParams};

pub const DEFAULT_MAX_RANGE_DAYS: i64 = 90;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be provided")]
    Missing { field: &'static str },
    #[error("{field} `{value}` is not a dd/mm/yyyy date")]
    MalformedDate { field: &'static str, value: String },
    #[error("fromDate {from} is after toDate {to}")]
    Reversed { from: String, to: String },
    #[error("date range spans {days} days; at most {max} allowed")]
    TooLong { days: i64, max: i64 },
    #[error("district `{0}` is not recognised")]
    UnknownDistrict(String),
}

impl From<ValidationError> for JobServiceError {
    fn from(err: ValidationError) -> Self {
        match &err {
            ValidationError::Missing { field } | ValidationError::MalformedDate { field, .. } => {
                JobServiceError::invalid_param(*field, err.to_string())
            }
            ValidationError::Reversed { .. } | ValidationError::TooLong { .. } => {
                JobServiceError::invalid_range(err.to_string())
            }
            ValidationError::UnknownDistrict(name) => JobServiceError::unknown_district(name),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubmissionValidator<'a> {
    districts: &'a DistrictDirectory,
    max_range_days: i64,
}

impl<'a> SubmissionValidator<'a> {
    pub fn new(districts: &'a DistrictDirectory, max_range_days: i64) -> Self {
        Self {
            districts,
            max_range_days,
        }
    }

    pub fn validate(
        &self,
        from_date: &str,
        to_date: &str,
        district_name: &str,
    ) -> Result<RunParams, ValidationError> {
        let from = parse_date("fromDate", from_date)?;
        let to = parse_date("toDate", to_date)?;
        if from > to {
            return Err(ValidationError::Reversed {
                from: from_date.trim().to_string(),
                to: to_date.trim().to_string(),
            });
        }
        let days = (to - from).num_days();
        if days > self.max_range_days {
            return Err(ValidationError::TooLong {
                days,
                max: self.max_range_days,
            });
        }

        let name = district_name.trim();
        if name.is_empty() {
            return Err(ValidationError::Missing {
                field: "districtName",
            });
        }
        let district = self
            .districts
            .lookup(name)
            .ok_or_else(|| ValidationError::UnknownDistrict(name.to_string()))?;

        Ok(RunParams {
            from_date: from,
            to_date: to,
            district,
        })
    }
}

pub fn parse_date(field: &'static str, value: &str) -> Result<NaiveDate, ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::Missing { field });
    }
    NaiveDate::parse_from_str(value, PORTAL_DATE_FORMAT).map_err(|_| {
        ValidationError::MalformedDate {
            field,
            value: value.to_string(),
        }
    })
}
