//! Listing page parser.
//!
//! Turns one listing page (HTML document or fragment) into article records
//! using a fixed [`ExtractionSchema`]. Malformed cards never fail the page:
//! a card without a usable link is skipped with a reason, other missing
//! fields default to empty. The page itself fails with
//! [`ParseError::SchemaDrift`] only when it clearly has content but not a
//! single card matches, which means the site markup changed.

use itertools::Itertools;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::config::SchemaConfig;
use crate::error::ParseError;
use crate::models::ArticleRecord;
use crate::normalize::canonical_url;

/// Compiled CSS selectors for one card layout.
#[derive(Debug)]
pub struct ExtractionSchema {
    card_source: String,
    card: Selector,
    link: Selector,
    title: Option<Selector>,
    date: Selector,
    image: Selector,
    summary: Option<Selector>,
    empty: Option<Selector>,
}

impl ExtractionSchema {
    pub fn compile(config: &SchemaConfig) -> Result<Self, ParseError> {
        Ok(Self {
            card_source: config.card.clone(),
            card: create_selector(&config.card)?,
            link: create_selector(&config.link)?,
            title: config.title.as_deref().map(create_selector).transpose()?,
            date: create_selector(&config.date)?,
            image: create_selector(&config.image)?,
            summary: config.summary.as_deref().map(create_selector).transpose()?,
            empty: config.empty.as_deref().map(create_selector).transpose()?,
        })
    }
}

fn create_selector(source: &str) -> Result<Selector, ParseError> {
    Selector::parse(source).map_err(|e| ParseError::InvalidSelector {
        selector: source.to_string(),
        reason: e.to_string(),
    })
}

/// A card that produced no record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedCard {
    /// Zero-based position of the card on the page.
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ParsedPage {
    /// Cards matched by the schema, valid or not.
    pub cards_seen: usize,
    /// One record per distinct article, in page order.
    pub records: Vec<ArticleRecord>,
    pub skipped: Vec<SkippedCard>,
    /// Cards repeating an article already on this page.
    pub duplicates: usize,
}

impl ParsedPage {
    /// A page with no cards marks the end of the listing.
    pub fn is_empty(&self) -> bool {
        self.cards_seen == 0
    }
}

pub fn parse_listing(
    html: &str,
    schema: &ExtractionSchema,
    base_url: &Url,
) -> Result<ParsedPage, ParseError> {
    let document = Html::parse_document(html);
    let cards: Vec<ElementRef> = document.select(&schema.card).collect();

    if cards.is_empty() {
        let explicitly_empty = schema
            .empty
            .as_ref()
            .is_some_and(|sel| document.select(sel).next().is_some());
        if explicitly_empty || !has_visible_text(&document) {
            debug!("Listing page holds no cards");
            return Ok(ParsedPage::default());
        }
        return Err(ParseError::SchemaDrift {
            selector: schema.card_source.clone(),
        });
    }

    let mut page = ParsedPage {
        cards_seen: cards.len(),
        ..ParsedPage::default()
    };
    let mut extracted = Vec::with_capacity(cards.len());
    for (index, card) in cards.into_iter().enumerate() {
        match extract_card(card, schema, base_url) {
            Ok(record) => extracted.push(record),
            Err(reason) => {
                warn!(index, %reason, "Skipping article card");
                page.skipped.push(SkippedCard { index, reason });
            }
        }
    }

    let total = extracted.len();
    page.records = extracted
        .into_iter()
        .unique_by(|r| canonical_url(&r.url))
        .collect();
    page.duplicates = total - page.records.len();

    debug!(
        cards = page.cards_seen,
        records = page.records.len(),
        skipped = page.skipped.len(),
        duplicates = page.duplicates,
        "Parsed listing page"
    );
    Ok(page)
}

fn has_visible_text(document: &Html) -> bool {
    let body = Selector::parse("body").ok();
    let root = body
        .as_ref()
        .and_then(|sel| document.select(sel).next())
        .unwrap_or_else(|| document.root_element());
    root.text().any(|t| !t.trim().is_empty())
}

fn extract_card(card: ElementRef, schema: &ExtractionSchema, base_url: &Url) -> Result<ArticleRecord, String> {
    let link = card
        .select(&schema.link)
        .next()
        .ok_or_else(|| "no link element".to_string())?;
    let href = link
        .value()
        .attr("href")
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| "link has no href".to_string())?;
    let url = base_url
        .join(href)
        .map_err(|e| format!("unresolvable href `{href}`: {e}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported link scheme `{}`", url.scheme()));
    }

    let link_text = element_text(link);
    let title = schema
        .title
        .as_ref()
        .and_then(|sel| card.select(sel).next())
        .map(element_text)
        .filter(|t| !t.is_empty())
        .unwrap_or(link_text);

    let published_date = card
        .select(&schema.date)
        .next()
        .map(|el| {
            el.value()
                .attr("datetime")
                .map(str::to_string)
                .unwrap_or_else(|| element_text(el))
        })
        .unwrap_or_default();

    let image_url = card
        .select(&schema.image)
        .next()
        .and_then(|img| {
            let value = img.value();
            value
                .attr("src")
                .filter(|s| !s.trim().is_empty())
                .or_else(|| value.attr("data-src"))
        })
        .and_then(|src| base_url.join(src.trim()).ok())
        .map(|u| u.to_string())
        .unwrap_or_default();

    let summary = schema
        .summary
        .as_ref()
        .and_then(|sel| card.select(sel).next())
        .map(element_text)
        .unwrap_or_default();

    Ok(ArticleRecord {
        url: url.to_string(),
        title,
        published_date,
        image_url,
        summary,
    })
}

fn element_text(el: ElementRef) -> String {
    el.text().collect::<Vec<_>>().join(" ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> ExtractionSchema {
        ExtractionSchema::compile(&SchemaConfig::default()).unwrap()
    }

    fn base() -> Url {
        Url::parse("https://www.insead.edu").unwrap()
    }

    fn card(href: Option<&str>, title: &str, datetime: &str) -> String {
        let link = match href {
            Some(h) => format!(r#"<a class="h3__link" href="{h}">{title}</a>"#),
            None => format!("<span>{title}</span>"),
        };
        format!(
            r#"<div class="story-card-object">
                 <a class="link--image-overlay" href="{h}"><img src="/sites/default/files/{slug}.jpg"></a>
                 <h3 class="list-object__heading">{link}</h3>
                 <time datetime="{datetime}">6 May 2025</time>
                 <p class="list-object__description">About {title}</p>
               </div>"#,
            h = href.unwrap_or("#"),
            slug = title.to_lowercase().replace(' ', "-"),
        )
    }

    #[test]
    fn test_parses_every_card() {
        let html = [
            card(Some("/newsroom/first-story"), "First Story", "2025-05-06T10:00:00Z"),
            card(Some("/newsroom/second-story"), "Second Story", "2025-05-05T10:00:00Z"),
        ]
        .join("\n");

        let page = parse_listing(&html, &schema(), &base()).unwrap();
        assert_eq!(page.cards_seen, 2);
        assert_eq!(page.records.len(), 2);
        assert!(page.skipped.is_empty());

        let first = &page.records[0];
        assert_eq!(first.url, "https://www.insead.edu/newsroom/first-story");
        assert_eq!(first.title, "First Story");
        assert_eq!(first.published_date, "2025-05-06T10:00:00Z");
        assert_eq!(first.image_url, "https://www.insead.edu/sites/default/files/first-story.jpg");
        assert_eq!(first.summary, "About First Story");
    }

    #[test]
    fn test_card_without_link_is_skipped() {
        let html = [
            card(Some("/newsroom/a"), "A", "2025-05-06"),
            card(None, "B", "2025-05-06"),
            card(Some("/newsroom/c"), "C", "2025-05-06"),
        ]
        .join("\n");

        let page = parse_listing(&html, &schema(), &base()).unwrap();
        assert_eq!(page.cards_seen, 3);
        assert_eq!(page.records.len(), 2);
        assert_eq!(
            page.skipped,
            vec![SkippedCard {
                index: 1,
                reason: "no link element".to_string()
            }]
        );
    }

    #[test]
    fn test_duplicates_within_page_are_collapsed() {
        let html = [
            card(Some("/newsroom/a"), "A", "2025-05-06"),
            card(Some("/newsroom/a/?utm_source=feed"), "A again", "2025-05-06"),
        ]
        .join("\n");

        let page = parse_listing(&html, &schema(), &base()).unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].title, "A");
        assert_eq!(page.duplicates, 1);
    }

    #[test]
    fn test_missing_optional_fields_default_to_empty() {
        let html = r#"<div class="story-card-object">
            <h3 class="list-object__heading"><a class="h3__link" href="https://www.insead.edu/x">X</a></h3>
        </div>"#;

        let page = parse_listing(html, &schema(), &base()).unwrap();
        let record = &page.records[0];
        assert_eq!(record.title, "X");
        assert_eq!(record.published_date, "");
        assert_eq!(record.image_url, "");
        assert_eq!(record.summary, "");
    }

    #[test]
    fn test_lazy_image_uses_data_src() {
        let html = r#"<div class="story-card-object">
            <a class="link--image-overlay"><img data-src="/img/lazy.jpg"></a>
            <h3 class="list-object__heading"><a class="h3__link" href="/x">X</a></h3>
        </div>"#;

        let page = parse_listing(html, &schema(), &base()).unwrap();
        assert_eq!(page.records[0].image_url, "https://www.insead.edu/img/lazy.jpg");
    }

    #[test]
    fn test_date_falls_back_to_text() {
        let config = SchemaConfig {
            date: "span.date".to_string(),
            ..SchemaConfig::default()
        };
        let html = r#"<div class="story-card-object">
            <h3 class="list-object__heading"><a class="h3__link" href="/x">X</a></h3>
            <span class="date"> 6 May 2025 </span>
        </div>"#;

        let schema = ExtractionSchema::compile(&config).unwrap();
        let page = parse_listing(html, &schema, &base()).unwrap();
        assert_eq!(page.records[0].published_date, "6 May 2025");
    }

    #[test]
    fn test_non_http_link_is_skipped() {
        let html = r#"<div class="story-card-object">
            <h3 class="list-object__heading"><a class="h3__link" href="mailto:press@insead.edu">Contact</a></h3>
        </div>"#;

        let page = parse_listing(html, &schema(), &base()).unwrap();
        assert!(page.records.is_empty());
        assert!(page.skipped[0].reason.contains("mailto"));
    }

    #[test]
    fn test_empty_fragment_is_end_of_listing() {
        let page = parse_listing("  <div class=\"view-content\"></div> ", &schema(), &base()).unwrap();
        assert!(page.is_empty());
    }

    #[test]
    fn test_empty_marker_is_end_of_listing() {
        let html = r#"<div class="view-empty"><p>No stories found.</p></div>"#;
        let page = parse_listing(html, &schema(), &base()).unwrap();
        assert!(page.is_empty());
    }

    #[test]
    fn test_content_without_cards_is_schema_drift() {
        let html = r#"<div class="news-tile"><h3><a href="/x">Redesigned card</a></h3></div>"#;
        let err = parse_listing(html, &schema(), &base()).unwrap_err();
        assert!(matches!(err, ParseError::SchemaDrift { ref selector } if selector == "div.story-card-object"));
    }

    #[test]
    fn test_invalid_selector_is_rejected() {
        let config = SchemaConfig {
            card: "div[".to_string(),
            ..SchemaConfig::default()
        };
        let err = ExtractionSchema::compile(&config).unwrap_err();
        assert!(matches!(err, ParseError::InvalidSelector { .. }));
    }
}
