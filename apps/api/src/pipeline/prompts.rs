// Stage prompt templates for the CV pipeline.
// Placeholders in braces are replaced before sending; the system prompt comes from
// llm_client::prompts.

/// Profile extraction. Replace `{job_title}` and `{cv_text}`.
pub const PROFILE_EXTRACTION_TEMPLATE: &str = r#"Extract structured candidate information from the following CV text.
Target job title: {job_title}

Return a JSON object with this EXACT shape (use null for anything not present in the CV):
{
  "candidateProfile": {
    "candidateName": "string or null",
    "jobTitle": "the target job title",
    "status": "string or null",
    "candidateEmail": "string or null",
    "candidatePhone": "string or null",
    "linkedInUrl": "string or null",
    "otherProfileUrls": ["string"],
    "currentLocation": "string or null",
    "currentTitle": "string or null",
    "currentCompany": "string or null",
    "professionalHeadline": "string or null",
    "totalExperienceYears": "number or null",
    "relevantExperienceYears": "number or null",
    "highestQualification": "string or null",
    "currentSalary": "string with currency, or null",
    "expectedSalary": "string with currency, or null",
    "availabilityStatus": "string or null",
    "visaStatus": "string or null"
  }
}

Rules:
- Experience years are numbers, never text.
- Include the currency in salary fields when the CV mentions one.
- Do not guess. Missing information is null.

CV Content:
{cv_text}"#;

/// PII identification. Replace `{cv_text}`.
pub const PII_IDENTIFICATION_TEMPLATE: &str = r#"Identify every piece of personally identifiable information (PII) in the following CV text.

Types to report: name, address, organization, school, job_title, certification_number,
license_number, national_id, and any other identifying value (email, phone, url, date_of_birth).

Return a JSON object with this EXACT shape:
{
  "pii_entities": [
    {
      "original_value": "exact text as it appears in the CV",
      "pii_type": "name",
      "sensitivity_level": 1,
      "all_variations": ["every other exact spelling used in the CV for the same entity"],
      "context": "where it appears",
      "region_specific": false
    }
  ]
}

Rules:
- original_value and every variation MUST be copied character for character from the CV.
- List each entity once, with all of its variations (initials, short forms, surname only).
- The candidate's own name comes first.
- sensitivity_level is 1 (low) to 4 (critical).

CV Content:
{cv_text}"#;

/// Skills analysis over anonymized text. Replace `{job_title}` and `{cv_text}`.
pub const SKILLS_ANALYSIS_TEMPLATE: &str = r#"Analyze the professional skills and experience in the following anonymized CV text.
Target job title: {job_title}

Bracketed tokens such as [CANDIDATE_NAME] or [COMPANY_1] stand in for redacted values.
Never try to recover what they replace.

Return a JSON object with this EXACT shape:
{
  "analysisMetrics": {
    "aiConfidenceScore": 0,
    "aiRemarks": "suitability for the target role, in two or three sentences",
    "overallFitScore": 0
  },
  "professionalProfile": {
    "coreSkills": [
      {"skillName": "string", "proficiencyLevel": "Beginner|Intermediate|Advanced|Expert", "yearsOfExperience": 0}
    ],
    "workExperience": [
      {
        "jobTitle": "string",
        "companySize": "Startup|Small|Medium|Large Enterprise",
        "duration": "string",
        "keyResponsibilities": ["string"],
        "keyAchievements": ["string"]
      }
    ],
    "educationProfile": {
      "highestDegreeLevel": "string or null",
      "fieldOfStudy": "string or null",
      "relevantCertifications": ["string"]
    }
  }
}

Both scores are integers from 0 to 100.

Anonymized CV Content:
{cv_text}"#;

pub fn profile_extraction(job_title: &str, cv_text: &str) -> String {
    PROFILE_EXTRACTION_TEMPLATE
        .replace("{job_title}", job_title)
        .replace("{cv_text}", cv_text)
}

pub fn pii_identification(cv_text: &str) -> String {
    PII_IDENTIFICATION_TEMPLATE.replace("{cv_text}", cv_text)
}

pub fn skills_analysis(job_title: &str, anonymized_text: &str) -> String {
    SKILLS_ANALYSIS_TEMPLATE
        .replace("{job_title}", job_title)
        .replace("{cv_text}", anonymized_text)
}
