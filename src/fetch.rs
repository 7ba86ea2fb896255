use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use reqwest::blocking::Client;
use scraper::{Html, Selector};

use crate::normalize::valid_email;

const TIMEOUT: Duration = Duration::from_secs(20);
// Company sites often block obvious bots; present as a regular browser
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// A fetched page: original HTML plus the readable text with scripts,
/// styles and head content stripped.
pub struct Page {
    pub url: String,
    pub html: String,
    pub text: String,
}

impl Page {
    pub fn from_html(url: &str, html: &str) -> Page {
        Page {
            url: url.to_string(),
            html: html.to_string(),
            text: page_text(html),
        }
    }

    /// Candidate contact emails: `mailto:` links first, then plain-text
    /// occurrences. Lowercased, deduplicated, order preserved.
    pub fn emails(&self) -> Vec<String> {
        let mut emails: Vec<String> = Vec::new();

        let document = Html::parse_document(&self.html);
        if let Ok(selector) = Selector::parse("a[href^='mailto:']") {
            for element in document.select(&selector) {
                if let Some(href) = element.value().attr("href") {
                    let addr = href
                        .trim_start_matches("mailto:")
                        .split('?')
                        .next()
                        .unwrap_or("")
                        .trim();
                    if valid_email(addr) {
                        push_unique(&mut emails, addr);
                    }
                }
            }
        }

        if let Ok(re) = Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}") {
            for m in re.find_iter(&self.text) {
                push_unique(&mut emails, m.as_str());
            }
        }

        emails
    }
}

pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new() -> Result<Fetcher> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(TIMEOUT)
            .build()
            .context("building fetch HTTP client")?;
        Ok(Fetcher { client })
    }

    pub fn fetch(&self, url: &str) -> Result<Page> {
        let url = normalize_url(url);
        let response = self
            .client
            .get(&url)
            .send()
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("fetching {url}"))?;
        let html = response
            .text()
            .with_context(|| format!("reading body of {url}"))?;
        Ok(Page::from_html(&url, &html))
    }
}

fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

/// Readable text of an HTML document. Text nodes under script, style,
/// noscript and head are dropped; the rest is joined with single spaces.
pub fn page_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut pieces: Vec<&str> = Vec::new();
    for node in document.tree.nodes() {
        if let scraper::node::Node::Text(text) = node.value() {
            let hidden = node.ancestors().any(|a| match a.value() {
                scraper::node::Node::Element(e) => {
                    matches!(e.name(), "script" | "style" | "noscript" | "head")
                }
                _ => false,
            });
            if !hidden {
                let piece = text.trim();
                if !piece.is_empty() {
                    pieces.push(piece);
                }
            }
        }
    }
    pieces.join(" ")
}

fn push_unique(emails: &mut Vec<String>, addr: &str) {
    let lowered = addr.to_lowercase();
    if !emails.contains(&lowered) {
        emails.push(lowered);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        <html>
          <head><title>Casa Anubis</title><style>body { color: red; }</style></head>
          <body>
            <script>var tracker = "ga@tracker.invalid";</script>
            <h1>Casa Funerară Anubis</h1>
            <p>Servicii funerare complete, non-stop.</p>
            <p>Scrieți-ne la contact@casa-anubis.ro sau</p>
            <a href="mailto:OFFICE@casa-anubis.ro?subject=Oferta">email</a>
          </body>
        </html>
    "#;

    #[test]
    fn test_page_text_strips_scripts_and_styles() {
        let text = page_text(SAMPLE);
        assert!(text.contains("Servicii funerare complete"));
        assert!(!text.contains("tracker"));
        assert!(!text.contains("color: red"));
        // Head content (the title) is not part of the readable text
        assert!(!text.contains("Casa Anubis"));
    }

    #[test]
    fn test_emails_from_mailto_and_text() {
        let page = Page::from_html("https://casa-anubis.ro", SAMPLE);
        let emails = page.emails();
        assert_eq!(
            emails,
            vec![
                "office@casa-anubis.ro".to_string(),
                "contact@casa-anubis.ro".to_string(),
            ]
        );
    }

    #[test]
    fn test_normalize_url_adds_scheme() {
        assert_eq!(normalize_url("casa-anubis.ro"), "https://casa-anubis.ro");
        assert_eq!(normalize_url("  http://casa-anubis.ro "), "http://casa-anubis.ro");
    }

    #[test]
    #[ignore] // network
    fn test_fetch_live() {
        let fetcher = Fetcher::new().expect("client");
        let page = fetcher.fetch("https://example.com").expect("fetch");
        assert!(page.text.to_lowercase().contains("example"));
    }
}
