//! Deterministic contact-channel scan used to fill gaps in an extracted profile.

use std::sync::OnceLock;

use regex::Regex;

use super::models::CandidateProfile;

const MIN_PHONE_DIGITS: usize = 9;
const MAX_PHONE_DIGITS: usize = 15;

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("static regex")
    })
}

fn phone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:\+\d{1,3}[\s.-]?)?(?:\(\d{2,4}\)[\s.-]?)?\d{2,4}[\s.-]?\d{3,4}(?:[\s.-]?\d{2,4})?")
            .expect("static regex")
    })
}

fn linkedin_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:https?://)?(?:[a-z]{2,3}\.)?linkedin\.com/in/[A-Za-z0-9_-]+")
            .expect("static regex")
    })
}

fn profile_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(?:https?://[^\s)>\]]+|(?:www\.)?(?:github|gitlab|bitbucket)\.(?:com|org)/[A-Za-z0-9_-]+)",
        )
        .expect("static regex")
    })
}

/// Contact channels found in free text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContactScan {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub linkedin_url: Option<String>,
    pub other_urls: Vec<String>,
}

pub fn scan(text: &str) -> ContactScan {
    let email = email_re().find(text).map(|m| m.as_str().to_string());

    let phone = phone_re()
        .find_iter(text)
        .map(|m| m.as_str().trim())
        .find(|candidate| {
            let digits = candidate.chars().filter(char::is_ascii_digit).count();
            (MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits)
        })
        .map(str::to_string);

    let linkedin_url = linkedin_re().find(text).map(|m| m.as_str().to_string());

    let mut other_urls: Vec<String> = Vec::new();
    for m in profile_url_re().find_iter(text) {
        let url = m.as_str().trim_end_matches(['.', ',', ';']);
        let lower = url.to_ascii_lowercase();
        if lower.contains("linkedin.com") || lower.contains('@') {
            continue;
        }
        if !other_urls.iter().any(|u| u == url) {
            other_urls.push(url.to_string());
        }
    }

    ContactScan {
        email,
        phone,
        linkedin_url,
        other_urls,
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

/// Fills missing contact fields from the scan. Returns the names of the fields it filled.
pub fn fill_missing(profile: &mut CandidateProfile, found: ContactScan) -> Vec<&'static str> {
    let mut filled = Vec::new();

    if is_blank(&profile.candidate_email) && found.email.is_some() {
        profile.candidate_email = found.email;
        filled.push("candidateEmail");
    }
    if is_blank(&profile.candidate_phone) && found.phone.is_some() {
        profile.candidate_phone = found.phone;
        filled.push("candidatePhone");
    }
    if is_blank(&profile.linkedin_url) && found.linkedin_url.is_some() {
        profile.linkedin_url = found.linkedin_url;
        filled.push("linkedInUrl");
    }
    let urls_missing = profile
        .other_profile_urls
        .as_ref()
        .map_or(true, |urls| urls.is_empty());
    if urls_missing && !found.other_urls.is_empty() {
        profile.other_profile_urls = Some(found.other_urls);
        filled.push("otherProfileUrls");
    }

    filled
}

#[cfg(test)]
mod tests {
    use super::*;

    const CV: &str = "Jane Doe\n\
        jane.doe@example.com | +44 7700 900123 | linkedin.com/in/janedoe\n\
        Portfolio: https://janedoe.dev, github.com/janedoe\n\
        Data Analyst, 2019-2023";

    #[test]
    fn test_scan_finds_each_channel() {
        let found = scan(CV);
        assert_eq!(found.email.as_deref(), Some("jane.doe@example.com"));
        assert_eq!(found.phone.as_deref(), Some("+44 7700 900123"));
        assert_eq!(found.linkedin_url.as_deref(), Some("linkedin.com/in/janedoe"));
        assert_eq!(
            found.other_urls,
            vec!["https://janedoe.dev".to_string(), "github.com/janedoe".to_string()]
        );
    }

    #[test]
    fn test_year_ranges_are_not_phones() {
        let found = scan("Analyst 2019-2023\nEngineer 2015 - 2019");
        assert!(found.phone.is_none());
    }

    #[test]
    fn test_service_values_win() {
        let mut profile = CandidateProfile {
            candidate_email: Some("jane@work.com".to_string()),
            candidate_phone: Some("  ".to_string()),
            ..CandidateProfile::default()
        };
        let filled = fill_missing(&mut profile, scan(CV));

        assert_eq!(profile.candidate_email.as_deref(), Some("jane@work.com"));
        assert_eq!(profile.candidate_phone.as_deref(), Some("+44 7700 900123"));
        assert_eq!(filled, vec!["candidatePhone", "linkedInUrl", "otherProfileUrls"]);
    }

    #[test]
    fn test_nothing_to_fill() {
        let mut profile = CandidateProfile::default();
        assert!(fill_missing(&mut profile, scan("no contact details here")).is_empty());
        assert_eq!(profile, CandidateProfile::default());
    }
}
