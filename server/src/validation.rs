//! Input validation for event bodies.
//!
//! Each input shape has its own function. Both return the input with blank
//! optional strings normalized away, or the full list of field errors so the
//! admin form can flag every bad input at once.

use url::Url;

use crate::error::FieldError;
use crate::types::{EventPatch, NewEvent};

pub const TITLE_REQUIRED: &str = "Event title is required";
pub const VENUE_REQUIRED: &str = "Venue is required";
pub const DATE_REQUIRED: &str = "Date is required";
pub const INVALID_URL: &str = "Invalid URL";

/// Validates a create body.
///
/// # Errors
///
/// Returns every failing field: blank `title`, `venue` or `date`, and an
/// `imageUrl` that is not an absolute URL.
pub fn validate_new_event(input: NewEvent) -> Result<NewEvent, Vec<FieldError>> {
    let mut errors = Vec::new();

    require_text("title", &input.title, TITLE_REQUIRED, &mut errors);
    require_text("venue", &input.venue, VENUE_REQUIRED, &mut errors);
    require_text("date", &input.date, DATE_REQUIRED, &mut errors);

    let image_url = non_blank(input.image_url);
    if let Some(url) = &image_url {
        check_url("imageUrl", url, &mut errors);
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(NewEvent {
        description: non_blank(input.description),
        image_url,
        ..input
    })
}

/// Validates a partial update body.
///
/// Only supplied fields are checked. An explicit `null` for `title`, `venue`
/// or `date` is rejected like a blank string. A blank optional string clears
/// the column, same as an explicit `null`.
pub fn validate_event_patch(patch: EventPatch) -> Result<EventPatch, Vec<FieldError>> {
    let mut errors = Vec::new();

    if let Some(title) = &patch.title {
        require_text("title", title.as_deref().unwrap_or(""), TITLE_REQUIRED, &mut errors);
    }
    if let Some(venue) = &patch.venue {
        require_text("venue", venue.as_deref().unwrap_or(""), VENUE_REQUIRED, &mut errors);
    }
    if let Some(date) = &patch.date {
        require_text("date", date.as_deref().unwrap_or(""), DATE_REQUIRED, &mut errors);
    }

    let image_url = patch.image_url.map(non_blank);
    if let Some(Some(url)) = &image_url {
        check_url("imageUrl", url, &mut errors);
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(EventPatch {
        description: patch.description.map(non_blank),
        image_url,
        ..patch
    })
}

fn require_text(field: &str, value: &str, message: &str, errors: &mut Vec<FieldError>) {
    if value.trim().is_empty() {
        errors.push(FieldError::new(field, message));
    }
}

fn check_url(field: &str, value: &str, errors: &mut Vec<FieldError>) {
    // Url::parse rejects relative references, which is what we want here.
    if Url::parse(value).is_err() {
        errors.push(FieldError::new(field, INVALID_URL));
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launch() -> NewEvent {
        NewEvent {
            title: "Launch".to_string(),
            venue: "Hall A".to_string(),
            date: "2025-01-01".to_string(),
            description: None,
            image_url: None,
        }
    }

    fn fields(errors: &[FieldError]) -> Vec<&str> {
        errors.iter().map(|e| e.field.as_str()).collect()
    }

    #[test]
    fn accepts_minimal_event() {
        let input = launch();
        assert_eq!(validate_new_event(input.clone()), Ok(input));
    }

    #[test]
    fn rejects_empty_title() {
        let errors = validate_new_event(NewEvent {
            title: String::new(),
            ..launch()
        })
        .unwrap_err();

        assert_eq!(errors, vec![FieldError::new("title", TITLE_REQUIRED)]);
    }

    #[test]
    fn rejects_whitespace_only_fields() {
        let errors = validate_new_event(NewEvent {
            venue: "   ".to_string(),
            date: "\t".to_string(),
            ..launch()
        })
        .unwrap_err();

        assert_eq!(fields(&errors), vec!["venue", "date"]);
    }

    #[test]
    fn reports_every_failing_field() {
        let errors = validate_new_event(NewEvent {
            image_url: Some("not a url".to_string()),
            ..NewEvent::default()
        })
        .unwrap_err();

        assert_eq!(fields(&errors), vec!["title", "venue", "date", "imageUrl"]);
        assert_eq!(errors[3].message, INVALID_URL);
    }

    #[test]
    fn rejects_relative_image_url() {
        let errors = validate_new_event(NewEvent {
            image_url: Some("/uploads/poster.png".to_string()),
            ..launch()
        })
        .unwrap_err();

        assert_eq!(fields(&errors), vec!["imageUrl"]);
    }

    #[test]
    fn accepts_absolute_image_url() {
        let validated = validate_new_event(NewEvent {
            image_url: Some("https://cdn.example.com/poster.png".to_string()),
            ..launch()
        })
        .unwrap();

        assert_eq!(
            validated.image_url.as_deref(),
            Some("https://cdn.example.com/poster.png")
        );
    }

    #[test]
    fn blank_optional_strings_become_absent() {
        let validated = validate_new_event(NewEvent {
            description: Some(String::new()),
            image_url: Some("  ".to_string()),
            ..launch()
        })
        .unwrap();

        assert_eq!(validated.description, None);
        assert_eq!(validated.image_url, None);
    }

    #[test]
    fn patch_checks_only_supplied_fields() {
        let patch = EventPatch {
            venue: Some(Some("Hall B".to_string())),
            ..EventPatch::default()
        };
        assert_eq!(validate_event_patch(patch.clone()), Ok(patch));
    }

    #[test]
    fn patch_rejects_blank_title() {
        let errors = validate_event_patch(EventPatch {
            title: Some(Some(String::new())),
            ..EventPatch::default()
        })
        .unwrap_err();

        assert_eq!(errors, vec![FieldError::new("title", TITLE_REQUIRED)]);
    }

    #[test]
    fn patch_rejects_null_required_fields() {
        let errors = validate_event_patch(EventPatch {
            title: Some(None),
            venue: Some(None),
            date: Some(None),
            ..EventPatch::default()
        })
        .unwrap_err();

        assert_eq!(
            errors,
            vec![
                FieldError::new("title", TITLE_REQUIRED),
                FieldError::new("venue", VENUE_REQUIRED),
                FieldError::new("date", DATE_REQUIRED),
            ]
        );
    }

    #[test]
    fn patch_rejects_bad_image_url() {
        let errors = validate_event_patch(EventPatch {
            image_url: Some(Some("nope".to_string())),
            ..EventPatch::default()
        })
        .unwrap_err();

        assert_eq!(fields(&errors), vec!["imageUrl"]);
    }

    #[test]
    fn patch_blank_optional_clears_column() {
        let validated = validate_event_patch(EventPatch {
            description: Some(Some(String::new())),
            image_url: Some(Some(String::new())),
            ..EventPatch::default()
        })
        .unwrap();

        assert_eq!(validated.description, Some(None));
        assert_eq!(validated.image_url, Some(None));
    }

    #[test]
    fn empty_patch_is_valid() {
        assert_eq!(
            validate_event_patch(EventPatch::default()),
            Ok(EventPatch::default())
        );
    }
}
