use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::error::StoreError;
use crate::models::{
    CareStatus, EvaluationRecord, NewEvaluation, RawEvaluation, RawTimestamp, UNSET_ASSESSOR,
};

/// Parses the date shapes found in stored documents and typed on the
/// command line: RFC 3339, `YYYY-MM-DDTHH:MM[:SS]` and `YYYY-MM-DD`.
/// Naive values are taken as UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn resolve(value: Option<&RawTimestamp>) -> Option<DateTime<Utc>> {
    match value? {
        RawTimestamp::Timestamp(at) => Some(*at),
        RawTimestamp::EpochMillis(millis) => Utc.timestamp_millis_opt(*millis).single(),
        RawTimestamp::Text(text) => parse_timestamp(text),
    }
}

impl EvaluationRecord {
    /// Maps a stored document into a record, defaulting every field that is
    /// missing or unreadable. `now` is the last resort for both dates.
    pub fn from_raw(id: impl Into<String>, raw: &RawEvaluation, now: DateTime<Utc>) -> Self {
        let created_at = resolve(raw.created_at.as_ref());
        let assessment_date = resolve(raw.assessment_date.as_ref())
            .or(created_at)
            .unwrap_or(now);

        let assessor = raw
            .assessor
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(UNSET_ASSESSOR)
            .to_string();

        EvaluationRecord {
            id: id.into(),
            assessor,
            bone_protection: CareStatus::from_stored(raw.bone_protection.as_deref()),
            incontinence_care: CareStatus::from_stored(raw.incontinence_care.as_deref()),
            notes: raw.notes.clone().unwrap_or_default(),
            assessment_date,
            created_at: created_at.unwrap_or(now),
            created_by: raw
                .created_by
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string),
        }
    }
}

impl NewEvaluation {
    /// Normalises the payload, rejecting it before any store I/O when the
    /// assessor name is blank.
    pub fn validated(self) -> Result<NewEvaluation, StoreError> {
        let assessor = self.assessor.trim().to_string();
        if assessor.is_empty() {
            return Err(StoreError::Validation(
                "assessor name is required".to_string(),
            ));
        }

        Ok(NewEvaluation {
            assessor,
            notes: self.notes.trim().to_string(),
            created_by: self
                .created_by
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            ..self
        })
    }

    /// The document written for this payload once the store assigns `created_at`.
    pub fn to_raw(&self, created_at: DateTime<Utc>) -> RawEvaluation {
        RawEvaluation {
            assessor: Some(self.assessor.clone()),
            bone_protection: Some(self.bone_protection.as_str().to_string()),
            incontinence_care: Some(self.incontinence_care.as_str().to_string()),
            notes: Some(self.notes.clone()),
            assessment_date: Some(RawTimestamp::Timestamp(self.assessment_date)),
            created_at: Some(RawTimestamp::Timestamp(created_at)),
            created_by: self.created_by.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn parses_supported_date_shapes() {
        assert_eq!(parse_timestamp("2025-01-15"), Some(at(2025, 1, 15)));
        assert_eq!(
            parse_timestamp("2025-01-15T09:30"),
            Some(Utc.with_ymd_and_hms(2025, 1, 15, 9, 30, 0).unwrap())
        );
        assert_eq!(
            parse_timestamp("2025-01-15T09:30:00+09:00"),
            Some(Utc.with_ymd_and_hms(2025, 1, 15, 0, 30, 0).unwrap())
        );
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp("   "), None);
    }

    #[test]
    fn empty_document_maps_to_defaults() {
        let now = at(2026, 3, 4);
        let record = EvaluationRecord::from_raw("doc-1", &RawEvaluation::default(), now);

        assert_eq!(record.assessor, UNSET_ASSESSOR);
        assert_eq!(record.bone_protection, CareStatus::Na);
        assert_eq!(record.incontinence_care, CareStatus::Na);
        assert_eq!(record.notes, "");
        assert_eq!(record.assessment_date, now);
        assert_eq!(record.created_at, now);
        assert_eq!(record.created_by, None);
    }

    #[test]
    fn assessment_date_falls_back_to_created_at() {
        let raw = RawEvaluation {
            assessment_date: Some(RawTimestamp::Text("not a date".to_string())),
            created_at: Some(RawTimestamp::EpochMillis(at(2025, 6, 1).timestamp_millis())),
            ..RawEvaluation::default()
        };
        let record = EvaluationRecord::from_raw("doc-2", &raw, at(2026, 1, 1));
        assert_eq!(record.assessment_date, at(2025, 6, 1));
        assert_eq!(record.created_at, at(2025, 6, 1));
    }

    #[test]
    fn assessor_is_trimmed_and_invalid_status_becomes_na() {
        let raw = RawEvaluation {
            assessor: Some("  Nurse Tanaka ".to_string()),
            bone_protection: Some("yes".to_string()),
            incontinence_care: Some("not_done".to_string()),
            created_by: Some("   ".to_string()),
            ..RawEvaluation::default()
        };
        let record = EvaluationRecord::from_raw("doc-3", &raw, at(2026, 1, 1));
        assert_eq!(record.assessor, "Nurse Tanaka");
        assert_eq!(record.bone_protection, CareStatus::Na);
        assert_eq!(record.incontinence_care, CareStatus::NotDone);
        assert_eq!(record.created_by, None);
    }

    #[test]
    fn blank_assessor_fails_validation() {
        let payload = NewEvaluation {
            assessor: "   ".to_string(),
            bone_protection: CareStatus::Done,
            incontinence_care: CareStatus::Done,
            notes: String::new(),
            assessment_date: at(2025, 1, 1),
            created_by: None,
        };
        assert!(matches!(
            payload.validated(),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn validation_trims_text_fields() {
        let payload = NewEvaluation {
            assessor: " Ito ".to_string(),
            bone_protection: CareStatus::Done,
            incontinence_care: CareStatus::Na,
            notes: " turned every 2h \n".to_string(),
            assessment_date: at(2025, 1, 1),
            created_by: Some(" ".to_string()),
        }
        .validated()
        .unwrap();
        assert_eq!(payload.assessor, "Ito");
        assert_eq!(payload.notes, "turned every 2h");
        assert_eq!(payload.created_by, None);
    }
}
