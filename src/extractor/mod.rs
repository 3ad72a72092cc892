//! Detail-page and listing-page extraction.
//!
//! Everything here is pure: markup goes in, typed data comes out. Labels on the target site are
//! localized and shift over time, so the label-to-field mapping lives in two explicit rule tables
//! ([`HORIZON_RULES`], [`INFO_RULES`]) matched by case-insensitive substring, first match wins.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::ExtractionFailure;
use crate::models::GameRecord;

/// URL path markers that name a game category
const CATEGORY_MARKERS: &[&str] = &["slot", "casino"];
const DEFAULT_CATEGORY: &str = "other";

static LEADING_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d*\.?\d*").expect("leading number pattern is valid"));

static BET_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+\.?\d*)\s*-\s*(\d+\.?\d*)").expect("bet range pattern is valid")
});

/// A label substring and the field it selects
#[derive(Debug, Clone, Copy)]
pub struct LabelRule<F> {
    pub needle: &'static str,
    pub field: F,
}

/// Time windows shown in the RTP grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Horizon {
    Daily,
    Weekly,
    Monthly,
}

/// Rows of the key/value info grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoField {
    TheoreticalRtp,
    CurrentRtp,
    RiskLevel,
    Paylines,
    HitRatio,
    BetRange,
}

pub const HORIZON_RULES: &[LabelRule<Horizon>] = &[
    LabelRule { needle: "24", field: Horizon::Daily },
    LabelRule { needle: "hafta", field: Horizon::Weekly },
    LabelRule { needle: "week", field: Horizon::Weekly },
    LabelRule { needle: "ay", field: Horizon::Monthly },
    LabelRule { needle: "month", field: Horizon::Monthly },
];

pub const INFO_RULES: &[LabelRule<InfoField>] = &[
    LabelRule { needle: "teorik", field: InfoField::TheoreticalRtp },
    LabelRule { needle: "theoretical", field: InfoField::TheoreticalRtp },
    LabelRule { needle: "rtp", field: InfoField::CurrentRtp },
    LabelRule { needle: "risk", field: InfoField::RiskLevel },
    LabelRule { needle: "volatil", field: InfoField::RiskLevel },
    LabelRule { needle: "ödeme çizgileri", field: InfoField::Paylines },
    LabelRule { needle: "payline", field: InfoField::Paylines },
    LabelRule { needle: "isabet", field: InfoField::HitRatio },
    LabelRule { needle: "hit", field: InfoField::HitRatio },
    LabelRule { needle: "min - maks", field: InfoField::BetRange },
    LabelRule { needle: "min - max", field: InfoField::BetRange },
];

/// Resolve a label against a rule table.
///
/// Lowercasing the Turkish dotted capital `İ` leaves a combining dot behind; it is dropped so
/// `İSABET` still matches `isabet`.
pub fn match_label<F: Copy>(rules: &[LabelRule<F>], label: &str) -> Option<F> {
    let label = label.trim().to_lowercase().replace('\u{307}', "");
    rules
        .iter()
        .find(|rule| label.contains(rule.needle))
        .map(|rule| rule.field)
}

/// Strip everything but digits and dots, then parse the leading `digits[.digits]` run.
/// Never fails: input without a leading number is 0.0.
pub fn parse_rtp_value(text: &str) -> f64 {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    LEADING_NUMBER
        .find(&cleaned)
        .map_or("", |number| number.as_str())
        .parse()
        .unwrap_or(0.0)
}

/// Parse a `<number> - <number>` bet range
pub fn parse_bet_range(text: &str) -> Option<(f64, f64)> {
    let captures = BET_RANGE.captures(text)?;
    let min = captures.get(1)?.as_str().parse().ok()?;
    let max = captures.get(2)?.as_str().parse().ok()?;
    Some((min, max))
}

/// First path segment naming a category, `other` when none does
pub fn extract_category(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed.path_segments().and_then(|mut segments| {
                segments
                    .find(|segment| {
                        let segment = segment.to_lowercase();
                        CATEGORY_MARKERS.iter().any(|marker| segment.contains(marker))
                    })
                    .map(ToString::to_string)
            })
        })
        .unwrap_or_else(|| DEFAULT_CATEGORY.to_string())
}

/// CSS selectors for the parts of the target site's markup
#[derive(Debug, Clone)]
pub struct SiteSelectors {
    /// Detail links on a listing page
    pub game_link: String,
    pub name: String,
    pub provider: String,
    /// One cell per time window in the RTP grid
    pub horizon_cell: String,
    pub horizon_label: String,
    pub horizon_value: String,
    /// One row per entry of the info grid
    pub info_row: String,
    pub info_label: String,
    pub info_value: String,
}

impl Default for SiteSelectors {
    fn default() -> Self {
        Self {
            game_link: r#"a[href*="/play/"]"#.to_string(),
            name: "h1.font-headline.text-moon-18".to_string(),
            provider: "p.text-moon-10-caption".to_string(),
            horizon_cell: ".grid-cols-3 > div".to_string(),
            horizon_label: "span[data-translation]".to_string(),
            horizon_value: "span.font-medium".to_string(),
            info_row: ".grid.grid-flow-col".to_string(),
            info_label: "p.text-moon-16.text-trunks".to_string(),
            info_value: "p.text-moon-16.text-bulma".to_string(),
        }
    }
}

/// A record plus the field-level problems met while building it
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub record: GameRecord,
    pub warnings: Vec<String>,
}

/// Compiled selectors
pub struct Extractor {
    game_link: Selector,
    name: Selector,
    provider: Selector,
    horizon_cell: Selector,
    horizon_label: Selector,
    horizon_value: Selector,
    info_row: Selector,
    info_label: Selector,
    info_value: Selector,
}

fn compile(field: &'static str, selector: &str) -> Result<Selector, ExtractionFailure> {
    Selector::parse(selector).map_err(|e| ExtractionFailure::InvalidSelector {
        field,
        selector: selector.to_string(),
        reason: format!("{e:?}"),
    })
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn first_text(scope: ElementRef<'_>, selector: &Selector) -> String {
    scope.select(selector).next().map(text_of).unwrap_or_default()
}

impl Extractor {
    pub fn new(selectors: &SiteSelectors) -> Result<Self, ExtractionFailure> {
        Ok(Self {
            game_link: compile("game link", &selectors.game_link)?,
            name: compile("name", &selectors.name)?,
            provider: compile("provider", &selectors.provider)?,
            horizon_cell: compile("horizon cell", &selectors.horizon_cell)?,
            horizon_label: compile("horizon label", &selectors.horizon_label)?,
            horizon_value: compile("horizon value", &selectors.horizon_value)?,
            info_row: compile("info row", &selectors.info_row)?,
            info_label: compile("info label", &selectors.info_label)?,
            info_value: compile("info value", &selectors.info_value)?,
        })
    }

    /// Absolute, de-duplicated detail URLs of a listing page, in discovery order
    pub fn extract_links(&self, html: &str, base_url: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        let base = Url::parse(base_url).ok();

        let mut seen = HashSet::new();
        let mut links = Vec::new();

        for anchor in document.select(&self.game_link) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };

            let absolute = match &base {
                Some(base) => base.join(href.trim()).ok(),
                None => Url::parse(href.trim()).ok(),
            };
            let Some(mut url) = absolute else {
                continue;
            };

            url.set_query(None);
            url.set_fragment(None);
            let url = url.to_string();

            if seen.insert(url.clone()) {
                links.push(url);
            }
        }

        links
    }

    /// Build a [`GameRecord`] from a detail page.
    ///
    /// Missing fields fall back to empty or zero values and are listed in
    /// [`Extraction::warnings`]; only a page without a game name is rejected.
    pub fn extract(
        &self,
        html: &str,
        url: &str,
        observed_at: DateTime<Utc>,
    ) -> Result<Extraction, ExtractionFailure> {
        let document = Html::parse_document(html);
        let root = document.root_element();
        let mut warnings = Vec::new();

        let name = first_text(root, &self.name);
        if name.is_empty() {
            return Err(ExtractionFailure::MissingName {
                url: url.to_string(),
            });
        }

        let provider = first_text(root, &self.provider);
        if provider.is_empty() {
            warnings.push("provider name missing".to_string());
        }

        let mut record = GameRecord {
            name,
            provider,
            category: extract_category(url),
            theoretical_rtp: 0.0,
            current_rtp: 0.0,
            daily_rtp: 0.0,
            weekly_rtp: 0.0,
            monthly_rtp: 0.0,
            hit_ratio: 0.0,
            risk_level: String::new(),
            paylines: None,
            min_bet: None,
            max_bet: None,
            source_url: url.to_string(),
            observed_at,
        };

        let mut horizons_seen = Vec::new();
        for cell in document.select(&self.horizon_cell) {
            let label = first_text(cell, &self.horizon_label);
            let Some(horizon) = match_label(HORIZON_RULES, &label) else {
                continue;
            };

            let value = rtp_percentage(&first_text(cell, &self.horizon_value), &label, &mut warnings);
            match horizon {
                Horizon::Daily => record.daily_rtp = value,
                Horizon::Weekly => record.weekly_rtp = value,
                Horizon::Monthly => record.monthly_rtp = value,
            }
            horizons_seen.push(horizon);
        }

        for (horizon, window) in [
            (Horizon::Daily, "daily"),
            (Horizon::Weekly, "weekly"),
            (Horizon::Monthly, "monthly"),
        ] {
            if !horizons_seen.contains(&horizon) {
                warnings.push(format!("{window} RTP missing"));
            }
        }

        let mut current_seen = false;
        for row in document.select(&self.info_row) {
            let label = first_text(row, &self.info_label);
            let Some(field) = match_label(INFO_RULES, &label) else {
                continue;
            };
            let value = first_text(row, &self.info_value);

            match field {
                InfoField::TheoreticalRtp => {
                    record.theoretical_rtp = rtp_percentage(&value, &label, &mut warnings);
                }
                InfoField::CurrentRtp => {
                    record.current_rtp = rtp_percentage(&value, &label, &mut warnings);
                    current_seen = true;
                }
                InfoField::RiskLevel => record.risk_level = value,
                InfoField::Paylines => {
                    let digits: String = value.chars().filter(char::is_ascii_digit).collect();
                    record.paylines = digits.parse().ok();
                    if record.paylines.is_none() {
                        warnings.push(format!("unreadable paylines `{value}`"));
                    }
                }
                InfoField::HitRatio => record.hit_ratio = parse_rtp_value(&value),
                InfoField::BetRange => match parse_bet_range(&value) {
                    Some((min, max)) => {
                        record.min_bet = Some(min);
                        record.max_bet = Some(max);
                    }
                    None => warnings.push(format!("unreadable bet range `{value}`")),
                },
            }
        }

        if !current_seen {
            warnings.push("current RTP missing".to_string());
        }

        Ok(Extraction { record, warnings })
    }
}

/// Parse an RTP percentage, replacing out-of-range values with 0.0
fn rtp_percentage(text: &str, label: &str, warnings: &mut Vec<String>) -> f64 {
    if text.is_empty() {
        warnings.push(format!("empty value for `{label}`"));
        return 0.0;
    }

    let value = parse_rtp_value(text);
    if (0.0..=100.0).contains(&value) {
        value
    } else {
        warnings.push(format!("`{label}` value {value} outside 0-100"));
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{DetailPage, listing_page, observed_at};

    fn extractor() -> Extractor {
        Extractor::new(&SiteSelectors::default()).unwrap()
    }

    #[test]
    fn parses_rtp_values() {
        assert_eq!(parse_rtp_value("96.5%"), 96.5);
        assert_eq!(parse_rtp_value(""), 0.0);
        assert_eq!(parse_rtp_value("abc"), 0.0);
        assert_eq!(parse_rtp_value(" % 97.12 "), 97.12);
        assert_eq!(parse_rtp_value("1.2.3"), 1.2);
        assert_eq!(parse_rtp_value("96.5%."), 96.5);
        assert_eq!(parse_rtp_value("RTP: 96.50 %."), 96.5);
        assert_eq!(parse_rtp_value("."), 0.0);
    }

    #[test]
    fn parses_bet_ranges() {
        assert_eq!(parse_bet_range("0.20 - 100"), Some((0.2, 100.0)));
        assert_eq!(parse_bet_range("$1-$50"), None);
        assert_eq!(parse_bet_range("1 -50"), Some((1.0, 50.0)));
        assert_eq!(parse_bet_range("n/a"), None);
    }

    #[test]
    fn label_rules_resolve_in_order() {
        assert_eq!(match_label(HORIZON_RULES, "Son 24 Saat"), Some(Horizon::Daily));
        assert_eq!(match_label(HORIZON_RULES, "Bu Hafta"), Some(Horizon::Weekly));
        assert_eq!(match_label(HORIZON_RULES, "Bu Ay"), Some(Horizon::Monthly));
        assert_eq!(match_label(HORIZON_RULES, "Last month"), Some(Horizon::Monthly));
        assert_eq!(match_label(HORIZON_RULES, "All time"), None);

        assert_eq!(match_label(INFO_RULES, "Teorik RTP"), Some(InfoField::TheoreticalRtp));
        assert_eq!(match_label(INFO_RULES, "RTP"), Some(InfoField::CurrentRtp));
        assert_eq!(match_label(INFO_RULES, "ÖDEME ÇİZGİLERİ"), Some(InfoField::Paylines));
        assert_eq!(match_label(INFO_RULES, "İsabet Oranı"), Some(InfoField::HitRatio));
        assert_eq!(match_label(INFO_RULES, "Ödeme çizgileri"), Some(InfoField::Paylines));
        assert_eq!(match_label(INFO_RULES, "Min - Maks Bahis"), Some(InfoField::BetRange));
    }

    #[test]
    fn category_comes_from_url_path() {
        assert_eq!(extract_category("https://casino.test/tr/play/slots/book-of-ra"), "slots");
        assert_eq!(extract_category("https://casino.test/tr/live-casino/roulette"), "live-casino");
        assert_eq!(extract_category("https://casino.test/tr/play/crash"), "other");
        assert_eq!(extract_category("not a url"), "other");
    }

    #[test]
    fn extracts_a_full_detail_page() {
        let html = DetailPage::new("Book of Ra", "Novomatic")
            .rtp(96.21, 97.5, 95.8, 96.02)
            .theoretical(96.0)
            .info("Risk", "Yüksek")
            .info("Ödeme çizgileri", "10")
            .info("İsabet oranı", "31.5%")
            .info("Min - Maks Bahis", "0.10 - 50")
            .render();

        let url = "https://casino.test/tr/play/slots/book-of-ra";
        let extraction = extractor().extract(&html, url, observed_at()).unwrap();
        let record = extraction.record;

        assert!(extraction.warnings.is_empty(), "{:?}", extraction.warnings);
        assert_eq!(record.name, "Book of Ra");
        assert_eq!(record.provider, "Novomatic");
        assert_eq!(record.category, "slots");
        assert_eq!(record.current_rtp, 96.21);
        assert_eq!(record.daily_rtp, 97.5);
        assert_eq!(record.weekly_rtp, 95.8);
        assert_eq!(record.monthly_rtp, 96.02);
        assert_eq!(record.theoretical_rtp, 96.0);
        assert_eq!(record.risk_level, "Yüksek");
        assert_eq!(record.paylines, Some(10));
        assert_eq!(record.hit_ratio, 31.5);
        assert_eq!(record.min_bet, Some(0.1));
        assert_eq!(record.max_bet, Some(50.0));
        assert_eq!(record.source_url, url);
    }

    #[test]
    fn extraction_is_deterministic() {
        let html = DetailPage::new("Gates of Olympus", "Pragmatic Play")
            .rtp(96.5, 94.1, 96.9, 96.4)
            .render();
        let url = "https://casino.test/tr/play/slots/gates-of-olympus";
        let extractor = extractor();

        let first = extractor.extract(&html, url, observed_at()).unwrap();
        let second = extractor.extract(&html, url, observed_at()).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn missing_fields_default_with_warnings() {
        let html = DetailPage::new("Sweet Bonanza", "").render_bare();

        let extraction = extractor()
            .extract(&html, "https://casino.test/tr/play/sweet-bonanza", observed_at())
            .unwrap();

        assert_eq!(extraction.record.provider, "");
        assert_eq!(extraction.record.current_rtp, 0.0);
        assert_eq!(extraction.record.daily_rtp, 0.0);
        assert_eq!(extraction.record.category, "other");
        assert_eq!(extraction.record.paylines, None);
        assert!(extraction.warnings.contains(&"provider name missing".to_string()));
        assert!(extraction.warnings.contains(&"current RTP missing".to_string()));
        assert!(extraction.warnings.contains(&"weekly RTP missing".to_string()));
    }

    #[test]
    fn out_of_range_rtp_is_zeroed() {
        let html = DetailPage::new("Odd Game", "Odd Provider")
            .rtp(9650.0, 97.0, 97.0, 97.0)
            .render();

        let extraction = extractor()
            .extract(&html, "https://casino.test/tr/play/slots/odd", observed_at())
            .unwrap();

        assert_eq!(extraction.record.current_rtp, 0.0);
        assert_eq!(extraction.warnings.len(), 1);
    }

    #[test]
    fn page_without_name_fails() {
        let html = "<html><body><p class=\"text-moon-10-caption\">Novomatic</p></body></html>";

        let err = extractor()
            .extract(html, "https://casino.test/tr/play/slots/x", observed_at())
            .unwrap_err();

        assert!(matches!(err, ExtractionFailure::MissingName { .. }));
    }

    #[test]
    fn links_are_absolute_and_unique() {
        let html = listing_page(&[
            "/tr/play/slots/book-of-ra",
            "/tr/play/slots/book-of-ra?ref=lobby",
            "https://casino.test/tr/play/slots/sweet-bonanza",
            "/tr/play/slots/book-of-ra#top",
        ]);

        let links = extractor().extract_links(&html, "https://casino.test");

        assert_eq!(
            links,
            vec![
                "https://casino.test/tr/play/slots/book-of-ra",
                "https://casino.test/tr/play/slots/sweet-bonanza",
            ]
        );
    }

    #[test]
    fn empty_listing_has_no_links() {
        let html = "<html><body><a href=\"/tr/promotions\">Promos</a></body></html>";

        assert!(extractor().extract_links(html, "https://casino.test").is_empty());
    }

    #[test]
    fn invalid_selector_is_reported() {
        let selectors = SiteSelectors {
            name: "h1[".to_string(),
            ..SiteSelectors::default()
        };

        assert!(matches!(
            Extractor::new(&selectors),
            Err(ExtractionFailure::InvalidSelector { field: "name", .. })
        ));
    }
}
