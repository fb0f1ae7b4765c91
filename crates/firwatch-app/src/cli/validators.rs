use crate::services::validation::parse_date;

/// Validate a dd/mm/yyyy date argument; the original string is kept so the
/// service-side validation sees exactly what the user typed.
pub fn validate_portal_date(s: &str) -> Result<String, String> {
    parse_date("date", s).map_err(|err| err.to_string())?;
    Ok(s.trim().to_string())
}
