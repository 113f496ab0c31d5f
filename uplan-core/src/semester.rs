use crate::{Error, Result, config::CoursePatterns, upstream::UpstreamClient};

/// Checks a client supplied semester code, e.g. `2024W`.
pub fn validate_semester(raw: &str, patterns: &CoursePatterns) -> Result<String> {
    let code = raw.trim();
    if patterns.semester.is_match(code) {
        Ok(code.to_string())
    } else {
        Err(Error::Validation(format!("Invalid semester format: {raw}")))
    }
}

/// Asks the directory for the current semester. The call is internal and
/// never billed to a client.
pub async fn resolve_current_semester(
    upstream: &UpstreamClient,
    patterns: &CoursePatterns,
) -> Result<String> {
    let unresolved = |reason: String| {
        tracing::error!("Failed to fetch current semester: {}", reason);
        Error::Validation("Failed to fetch current semester from u:find API".to_string())
    };

    let body = upstream
        .current_semester()
        .await
        .map_err(|e| unresolved(e.to_string()))?;
    let text = String::from_utf8(body).map_err(|e| unresolved(e.to_string()))?;
    let semester = text.trim();

    if !patterns.semester.is_match(semester) {
        return Err(unresolved(format!("invalid semester format: {semester}")));
    }

    tracing::info!("Current semester: {}", semester);
    Ok(semester.to_string())
}
