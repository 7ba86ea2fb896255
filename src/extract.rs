use std::env;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::debug;
use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::address::{canonical_county, parse_address};
use crate::import::map_service;
use crate::models::{
    valid_service_tag, Company, Contact, ContactKind, CoordQuality, Location, LocationKind, Source,
};
use crate::normalize::{normalize_cui, normalize_phone, phone_tail, valid_email, PhoneKind};

const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
const DEFAULT_OLLAMA_MODEL: &str = "llama3.1";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

// Roughly 32k tokens of context at 4 chars per token, minus prompt and reply.
const MAX_CONTENT_CHARS: usize = 50_000;

const SYSTEM_PROMPT: &str = r#"You are an expert data analyst for the funeral industry. Extract structured information from funeral home website content.

Return this JSON object:
{
  "company_name": "Official company name (required)",
  "motto": "Short phrase representing the company ethos: quoted hero text, a mission statement, or text labeled 'Motto' or 'Deviza'. Under 200 characters. Do NOT mistake service descriptions for mottos. Return null if none found.",
  "phones": ["Every phone number found"],
  "email": "Primary contact email",
  "address": "Full physical address if mentioned",
  "city": "City name, extracted from the address or location info",
  "county": "Romanian county/judet (e.g. Timis, Bucuresti, Cluj). Infer from the city if not explicit.",
  "services": ["Service keywords. Valid values: transport, repatriation, cremation, embalming, wake_house, coffins, flowers, bureaucracy, religious, monuments"],
  "is_non_stop": "Boolean, true if '24/7', 'Non-Stop', '24 de ore' or similar is mentioned",
  "founded_year": "Founding year as an integer. Look for 'din anul', 'fondata in', 'activa din'. Return null if not found.",
  "fiscal_code": "Romanian CUI/CIF fiscal code: 'CUI: 12345678', 'CIF 12345678', 'Cod fiscal: 12345678' or 'RO12345678'. Usually in the footer or contact page. Return just the 6-10 digits without the RO prefix.",
  "facebook_url": "Facebook page URL if found",
  "instagram_url": "Instagram profile URL if found",
  "description": "Brief description of the company, 2-3 sentences"
}

Rules:
1. A motto is philosophical or emotional, not descriptive
2. Extract ALL phone numbers found
3. Only use service keywords from the valid list
4. Search the entire content carefully for the fiscal code
5. Return valid JSON only, no additional text"#;

// --- Extractor trait ---

pub trait Extractor {
    fn extract(&self, page_text: &str, url: &str) -> Result<ExtractedCompany>;
    fn model_name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Ollama,
}

#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub provider: ProviderKind,
    pub model_id: String,
}

/// Parse a provider spec of the form `openai`, `openai:gpt-4o-mini`,
/// `ollama` or `ollama:mistral`.
pub fn resolve_spec(spec: &str) -> Result<ModelSpec> {
    let (provider, model) = match spec.split_once(':') {
        Some((provider, model)) if !model.trim().is_empty() => (provider, Some(model.trim())),
        Some((provider, _)) => (provider, None),
        None => (spec, None),
    };
    match provider {
        "openai" => Ok(ModelSpec {
            provider: ProviderKind::OpenAi,
            model_id: model.unwrap_or(DEFAULT_OPENAI_MODEL).to_string(),
        }),
        "ollama" => Ok(ModelSpec {
            provider: ProviderKind::Ollama,
            model_id: model.unwrap_or(DEFAULT_OLLAMA_MODEL).to_string(),
        }),
        _ => Err(anyhow!(
            "Unknown extraction provider '{}'. Available: openai[:model], ollama[:model]",
            provider
        )),
    }
}

pub fn create_extractor(spec: &str) -> Result<Box<dyn Extractor>> {
    let spec = resolve_spec(spec)?;
    match spec.provider {
        ProviderKind::OpenAi => Ok(Box::new(OpenAiExtractor::new(spec.model_id)?)),
        ProviderKind::Ollama => Ok(Box::new(OllamaExtractor::new(spec.model_id)?)),
    }
}

/// What the model reads off a funeral home website. Only the name is
/// required; the process flow validates everything before it is stored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractedCompany {
    pub company_name: String,
    #[serde(default)]
    pub motto: Option<String>,
    #[serde(default, deserialize_with = "string_list")]
    pub phones: Vec<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub county: Option<String>,
    #[serde(default, deserialize_with = "string_list")]
    pub services: Vec<String>,
    #[serde(default, deserialize_with = "loose_bool")]
    pub is_non_stop: bool,
    #[serde(default, deserialize_with = "loose_year")]
    pub founded_year: Option<i32>,
    #[serde(default, deserialize_with = "loose_string")]
    pub fiscal_code: Option<String>,
    #[serde(default)]
    pub facebook_url: Option<String>,
    #[serde(default)]
    pub instagram_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

// Models ignore type instructions often enough that the risky fields accept
// either form: numbers as strings, strings as numbers, booleans as text.

fn loose_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => {
            let s = s.trim().to_string();
            if s.is_empty() { None } else { Some(s) }
        }
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn loose_year<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_i64().map(|y| y as i32),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn loose_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Bool(b)) => b,
        Some(Value::String(s)) => {
            matches!(s.trim().to_lowercase().as_str(), "true" | "yes" | "da" | "1")
        }
        _ => false,
    })
}

fn string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) => vec![s],
        _ => Vec::new(),
    })
}

fn user_prompt(page_text: &str, url: &str) -> String {
    format!(
        "Website URL: {url}\n\nWebsite content:\n{content}\n\n\
         Look carefully for email addresses; they usually sit on the contact \
         page or in the footer.\n\nExtract the company information as JSON.",
        content = truncate_chars(page_text, MAX_CONTENT_CHARS),
    )
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// Local models wrap JSON in a Markdown fence no matter what the prompt says.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

fn parse_extracted(text: &str) -> Result<ExtractedCompany> {
    serde_json::from_str(strip_code_fence(text))
        .context("Failed to parse the model reply as company JSON")
}

/// Turn a model reply into a `Company` rooted at the fetched URL. Phones are
/// normalized and deduplicated by tail, service keywords mapped onto the
/// taxonomy, the county canonicalized; the location starts ungeocoded.
pub fn company_from_extracted(extracted: &ExtractedCompany, url: &str) -> Company {
    let mut company = Company::new(&extracted.company_name, Source::Llm);
    company.motto = extracted.motto.clone();
    company.description = extracted.description.clone();
    company.website = Some(url.to_string());
    company.facebook_url = extracted.facebook_url.clone();
    company.instagram_url = extracted.instagram_url.clone();
    company.founded_year = extracted.founded_year;
    company.is_non_stop = extracted.is_non_stop;
    company.fiscal_code = extracted.fiscal_code.as_deref().and_then(normalize_cui);

    let mut seen_tails: Vec<String> = Vec::new();
    for phone in &extracted.phones {
        match normalize_phone(phone) {
            Ok((value, kind)) => {
                let tail = phone_tail(&value);
                if seen_tails.contains(&tail) {
                    continue;
                }
                seen_tails.push(tail);
                company.contacts.push(Contact {
                    kind: match kind {
                        PhoneKind::Mobile => ContactKind::PhoneMobile,
                        PhoneKind::Landline => ContactKind::PhoneLandline,
                    },
                    value,
                    is_primary: company.contacts.is_empty(),
                });
            }
            Err(err) => debug!("dropping phone '{}': {}", phone, err),
        }
    }
    if let Some(email) = &extracted.email {
        let email = email.trim().to_lowercase();
        if valid_email(&email) {
            company.contacts.push(Contact {
                kind: ContactKind::Email,
                value: email,
                is_primary: false,
            });
        }
    }

    // The model usually answers with taxonomy tags already; anything else
    // goes through the keyword mapping, unmapped keywords are dropped.
    let mut services: Vec<String> = Vec::new();
    for keyword in &extracted.services {
        let tag = if valid_service_tag(keyword) {
            Some(keyword.as_str())
        } else {
            map_service(keyword)
        };
        match tag {
            Some(tag) if !services.iter().any(|t| t == tag) => services.push(tag.to_string()),
            Some(_) => {}
            None => debug!("dropping unmapped service keyword '{}'", keyword),
        }
    }
    company.services = services;

    if let Some(address) = &extracted.address {
        let (parsed_city, parsed_county) = parse_address(address);
        let city = extracted.city.clone().or(parsed_city);
        let county = extracted
            .county
            .as_deref()
            .and_then(canonical_county)
            .map(str::to_string)
            .or(parsed_county);
        company.locations.push(Location {
            kind: LocationKind::Headquarters,
            address: address.clone(),
            city,
            county,
            latitude: None,
            longitude: None,
            coord_quality: CoordQuality::Nothing,
        });
    }

    company
}

// --- OpenAI extractor ---

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    temperature: f32,
    messages: Vec<OpenAiMessage>,
    response_format: ResponseFormat,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug)]
pub struct OpenAiExtractor {
    api_key: String,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl OpenAiExtractor {
    pub fn new(model_id: String) -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY").context(
            "OPENAI_API_KEY environment variable not set. Set it with: export OPENAI_API_KEY=your-key-here",
        )?;
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build the HTTP client")?;
        Ok(Self { api_key, model_id, client })
    }
}

impl Extractor for OpenAiExtractor {
    fn extract(&self, page_text: &str, url: &str) -> Result<ExtractedCompany> {
        let request = OpenAiRequest {
            model: self.model_id.clone(),
            temperature: 0.1,
            messages: vec![
                OpenAiMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                OpenAiMessage {
                    role: "user".to_string(),
                    content: user_prompt(page_text, url),
                },
            ],
            response_format: ResponseFormat {
                format_type: "json_object".to_string(),
            },
        };

        let response = self
            .client
            .post(OPENAI_API_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .context("Failed to send request to the OpenAI API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(anyhow!(
                "OpenAI API request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let api_response: OpenAiResponse = response
            .json()
            .context("Failed to parse the OpenAI API response")?;

        let content = api_response
            .choices
            .first()
            .map(|choice| choice.message.content.clone())
            .ok_or_else(|| anyhow!("No choices in the OpenAI API response"))?;
        parse_extracted(&content)
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- Ollama extractor ---

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    format: String,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

#[derive(Debug)]
pub struct OllamaExtractor {
    base_url: String,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl OllamaExtractor {
    pub fn new(model_id: String) -> Result<Self> {
        let base_url =
            env::var("OLLAMA_BASE_URL").unwrap_or_else(|_| DEFAULT_OLLAMA_URL.to_string());
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build the HTTP client")?;
        Ok(Self { base_url, model_id, client })
    }
}

impl Extractor for OllamaExtractor {
    fn extract(&self, page_text: &str, url: &str) -> Result<ExtractedCompany> {
        let request = OllamaRequest {
            model: self.model_id.clone(),
            prompt: format!("{}\n\n{}", SYSTEM_PROMPT, user_prompt(page_text, url)),
            stream: false,
            format: "json".to_string(),
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .with_context(|| format!("Failed to reach Ollama at {}", self.base_url))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(anyhow!(
                "Ollama request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let api_response: OllamaResponse = response
            .json()
            .context("Failed to parse the Ollama response")?;
        parse_extracted(&api_response.response)
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_spec_defaults_and_overrides() {
        let spec = resolve_spec("openai").unwrap();
        assert_eq!(spec.provider, ProviderKind::OpenAi);
        assert_eq!(spec.model_id, "gpt-4o");

        let spec = resolve_spec("openai:gpt-4o-mini").unwrap();
        assert_eq!(spec.model_id, "gpt-4o-mini");

        let spec = resolve_spec("ollama").unwrap();
        assert_eq!(spec.provider, ProviderKind::Ollama);
        assert_eq!(spec.model_id, "llama3.1");

        let spec = resolve_spec("ollama:mistral").unwrap();
        assert_eq!(spec.model_id, "mistral");

        assert!(resolve_spec("claude").is_err());
    }

    #[test]
    fn test_openai_extractor_requires_api_key() {
        let original = env::var("OPENAI_API_KEY").ok();
        unsafe { env::remove_var("OPENAI_API_KEY"); }

        let result = OpenAiExtractor::new("gpt-4o".to_string());

        if let Some(val) = original {
            unsafe { env::set_var("OPENAI_API_KEY", val); }
        }

        assert!(result.is_err());
        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("  {\"a\": 1}  "), "{\"a\": 1}");
    }

    #[test]
    fn test_parse_extracted_tolerates_messy_fields() {
        let reply = r#"```json
        {
          "company_name": "Casa Funerară Anubis",
          "phones": null,
          "services": "transport",
          "is_non_stop": "true",
          "founded_year": "2010",
          "fiscal_code": 12345678
        }
        ```"#;
        let extracted = parse_extracted(reply).expect("parse");
        assert_eq!(extracted.company_name, "Casa Funerară Anubis");
        assert!(extracted.phones.is_empty());
        assert_eq!(extracted.services, vec!["transport".to_string()]);
        assert!(extracted.is_non_stop);
        assert_eq!(extracted.founded_year, Some(2010));
        assert_eq!(extracted.fiscal_code.as_deref(), Some("12345678"));
    }

    #[test]
    fn test_parse_extracted_requires_name() {
        assert!(parse_extracted(r#"{"motto": "Alături de familie"}"#).is_err());
    }

    #[test]
    fn test_company_from_extracted() {
        let extracted = ExtractedCompany {
            company_name: "Casa Funerară Anubis".to_string(),
            motto: Some("Alături de familie".to_string()),
            phones: vec![
                "+40 723 456 789".to_string(),
                "0723.456.789".to_string(),
                "0256 123 456".to_string(),
            ],
            email: Some("Contact@Anubis.ro".to_string()),
            address: Some("Calea Lugojului 45, Timișoara".to_string()),
            city: None,
            county: Some("timis".to_string()),
            services: vec![
                "transport".to_string(),
                "sicrie".to_string(),
                "catering".to_string(),
            ],
            is_non_stop: true,
            founded_year: Some(2010),
            fiscal_code: Some("RO12345678".to_string()),
            ..Default::default()
        };

        let company = company_from_extracted(&extracted, "https://anubis.ro");
        assert_eq!(company.source, Source::Llm);
        assert_eq!(company.website.as_deref(), Some("https://anubis.ro"));
        assert_eq!(company.fiscal_code.as_deref(), Some("12345678"));

        // The duplicate mobile number collapses to one contact
        let phones: Vec<&str> = company.phone_values().collect();
        assert_eq!(phones, vec!["0723456789", "0256123456"]);
        assert!(company.contacts[0].is_primary);
        assert_eq!(company.contacts.last().map(|c| c.value.as_str()), Some("contact@anubis.ro"));

        // Tags pass through, keywords map, the rest is dropped
        assert_eq!(
            company.services,
            vec!["transport".to_string(), "coffins".to_string()]
        );

        assert_eq!(company.locations.len(), 1);
        assert_eq!(company.locations[0].city.as_deref(), Some("Timișoara"));
        assert_eq!(company.locations[0].county.as_deref(), Some("Timiș"));
        assert_eq!(company.locations[0].coord_quality, CoordQuality::Nothing);
        assert!(company.validate().is_ok());
    }

    #[test]
    #[ignore] // Requires a running Ollama instance
    fn test_ollama_extract_live() {
        let extractor = OllamaExtractor::new(DEFAULT_OLLAMA_MODEL.to_string()).expect("extractor");
        let page = "Casa Funerară Anubis, Timișoara. Telefon: 0723 456 789. \
                    Servicii funerare complete, transport funerar, sicrie. CUI: 12345678.";
        let extracted = extractor.extract(page, "https://anubis.ro").expect("extract");
        assert!(!extracted.company_name.is_empty());
    }
}
