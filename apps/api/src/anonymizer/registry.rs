use std::collections::HashMap;

use super::PiiType;

/// Hands out stable placeholders for one document.
///
/// The first `name` entity is the candidate (`[CANDIDATE_NAME]`); later distinct names
/// become `[PERSON_2]`, `[PERSON_3]`, ... Every other type gets its own numbered family.
/// Counters only grow, and a value seen twice gets the placeholder it got the first time.
#[derive(Debug, Default)]
pub struct PlaceholderRegistry {
    counters: HashMap<PiiType, u32>,
    assigned: HashMap<(PiiType, String), String>,
}

impl PlaceholderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn placeholder_for(&mut self, pii_type: &PiiType, original_value: &str) -> String {
        let key = (pii_type.clone(), original_value.to_string());
        if let Some(existing) = self.assigned.get(&key) {
            return existing.clone();
        }

        let counter = self.counters.entry(pii_type.clone()).or_insert(0);
        *counter += 1;
        let placeholder = render(pii_type, *counter);

        self.assigned.insert(key, placeholder.clone());
        placeholder
    }
}

fn render(pii_type: &PiiType, n: u32) -> String {
    match pii_type {
        PiiType::Name if n == 1 => "[CANDIDATE_NAME]".to_string(),
        PiiType::Name => format!("[PERSON_{n}]"),
        other => format!("[{}_{n}]", family(other)),
    }
}

fn family(pii_type: &PiiType) -> String {
    match pii_type {
        PiiType::Name => "PERSON".to_string(),
        PiiType::Organization => "COMPANY".to_string(),
        PiiType::School => "UNIVERSITY".to_string(),
        PiiType::Address => "ADDRESS".to_string(),
        PiiType::JobTitle => "JOB_TITLE".to_string(),
        PiiType::CertificationNumber => "CERT_NUMBER".to_string(),
        PiiType::LicenseNumber => "LICENSE_NUMBER".to_string(),
        PiiType::NationalId => "NATIONAL_ID".to_string(),
        PiiType::Other(raw) => {
            let upper: String = raw
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() {
                        c.to_ascii_uppercase()
                    } else {
                        '_'
                    }
                })
                .collect();
            if upper.starts_with(|c: char| c.is_ascii_uppercase()) {
                upper
            } else {
                format!("PII_{upper}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_name_is_candidate_then_persons() {
        let mut registry = PlaceholderRegistry::new();
        assert_eq!(registry.placeholder_for(&PiiType::Name, "Jane Doe"), "[CANDIDATE_NAME]");
        assert_eq!(registry.placeholder_for(&PiiType::Name, "Tom Reed"), "[PERSON_2]");
        assert_eq!(registry.placeholder_for(&PiiType::Name, "Ava Li"), "[PERSON_3]");
    }

    #[test]
    fn test_same_value_same_placeholder() {
        let mut registry = PlaceholderRegistry::new();
        let first = registry.placeholder_for(&PiiType::Organization, "Acme Ltd");
        registry.placeholder_for(&PiiType::Organization, "Globex");
        let again = registry.placeholder_for(&PiiType::Organization, "Acme Ltd");
        assert_eq!(first, "[COMPANY_1]");
        assert_eq!(again, first);
        assert_eq!(
            registry.placeholder_for(&PiiType::Organization, "Initech"),
            "[COMPANY_3]"
        );
    }

    #[test]
    fn test_families_count_independently() {
        let mut registry = PlaceholderRegistry::new();
        assert_eq!(registry.placeholder_for(&PiiType::School, "MIT"), "[UNIVERSITY_1]");
        assert_eq!(
            registry.placeholder_for(&PiiType::CertificationNumber, "AWS-123"),
            "[CERT_NUMBER_1]"
        );
        assert_eq!(registry.placeholder_for(&PiiType::School, "Yale"), "[UNIVERSITY_2]");
        assert_eq!(
            registry.placeholder_for(&PiiType::NationalId, "AB123456C"),
            "[NATIONAL_ID_1]"
        );
    }

    #[test]
    fn test_unknown_type_uses_uppercased_family() {
        let mut registry = PlaceholderRegistry::new();
        assert_eq!(
            registry.placeholder_for(&PiiType::Other("email".to_string()), "a@b.c"),
            "[EMAIL_1]"
        );
        assert_eq!(
            registry.placeholder_for(&PiiType::Other("phone number".to_string()), "555"),
            "[PHONE_NUMBER_1]"
        );
        assert_eq!(
            registry.placeholder_for(&PiiType::Other("2fa code".to_string()), "9"),
            "[PII_2FA_CODE_1]"
        );
    }
}
