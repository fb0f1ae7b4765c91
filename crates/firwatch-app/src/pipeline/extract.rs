//! Result-grid parsing and row relevance classification.

use std::fmt;

use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

use crate::pipeline::filename::FileNameParts;
use crate::portal::PortalSelectors;

/// Cells per result row; anything else is header, footer or pager noise.
pub const FIELD_COUNT: usize = 10;

const COL_DISTRICT: usize = 2;
const COL_POLICE_STATION: usize = 3;
const COL_YEAR: usize = 4;
const COL_FIR_NUMBER: usize = 5;
const COL_SECTIONS: usize = 7;
const COL_ACT_DESCRIPTION: usize = 8;
const COL_DOWNLOAD: usize = 9;

const FINGERPRINT_SEPARATOR: &[u8] = b"\x1f";

/// Titles of the Prevention of Cruelty to Animals Act and the Maharashtra
/// Animal Preservation Act as they appear in the portal (English, Marathi,
/// Hindi). Matched verbatim.
pub const DEFAULT_TARGET_PHRASES: &[&str] = &[
    "Prevention of Cruelty to Animals Act",
    "PREVENTION OF CRUELTY TO ANIMALS ACT",
    "Prevention of Cruelty to Animals",
    "प्राण्यांना क्रूरतेने वागविण्यास प्रतिबंध अधिनियम",
    "प्राण्यांचा छळ प्रतिबंधक अधिनियम",
    "पशुओं के प्रति क्रूरता निवारण अधिनियम",
    "पशु क्रूरता निवारण अधिनियम",
    "Maharashtra Animal Preservation Act",
    "MAHARASHTRA ANIMAL PRESERVATION ACT",
    "महाराष्ट्र प्राणी रक्षण अधिनियम",
    "महाराष्ट्र पशु संरक्षण अधिनियम",
];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid `{name}` selector `{selector}`: {message}")]
    InvalidSelector {
        name: &'static str,
        selector: String,
        message: String,
    },
}

/// Compiled form of the grid and pager selectors.
#[derive(Debug)]
pub struct ResultSelectors {
    pub row: Selector,
    pub download: Selector,
    pub pager: Selector,
    pub pager_link: Selector,
    pub pager_current: Selector,
    pub total_records: Selector,
    pub no_records: Selector,
}

impl ResultSelectors {
    pub fn compile(selectors: &PortalSelectors) -> Result<Self, ExtractError> {
        Ok(Self {
            row: parse_selector("result_row", &selectors.result_row)?,
            download: parse_selector("download_control", &selectors.download_control)?,
            pager: parse_selector("pager", &selectors.pager)?,
            pager_link: parse_selector("pager_link", &selectors.pager_link)?,
            pager_current: parse_selector("pager_current", &selectors.pager_current)?,
            total_records: parse_selector("total_records", &selectors.total_records)?,
            no_records: parse_selector("no_records", &selectors.no_records)?,
        })
    }
}

fn parse_selector(name: &'static str, raw: &str) -> Result<Selector, ExtractError> {
    Selector::parse(raw).map_err(|err| ExtractError::InvalidSelector {
        name,
        selector: raw.to_string(),
        message: err.to_string(),
    })
}

/// Selector that re-finds a row's download control on the live page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTrigger {
    pub selector: String,
}

/// One record of the result grid, cells in table order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirRow {
    fields: [String; FIELD_COUNT],
    pub trigger: Option<DownloadTrigger>,
}

impl FirRow {
    pub fn new(fields: [String; FIELD_COUNT], trigger: Option<DownloadTrigger>) -> Self {
        Self { fields, trigger }
    }

    pub fn fields(&self) -> &[String; FIELD_COUNT] {
        &self.fields
    }

    pub fn district(&self) -> &str {
        &self.fields[COL_DISTRICT]
    }

    pub fn police_station(&self) -> &str {
        &self.fields[COL_POLICE_STATION]
    }

    pub fn year(&self) -> &str {
        &self.fields[COL_YEAR]
    }

    pub fn fir_number(&self) -> &str {
        &self.fields[COL_FIR_NUMBER]
    }

    pub fn sections(&self) -> &str {
        &self.fields[COL_SECTIONS]
    }

    pub fn act_description(&self) -> &str {
        &self.fields[COL_ACT_DESCRIPTION]
    }

    pub fn file_name_parts(&self) -> FileNameParts {
        FileNameParts {
            district: self.district().to_string(),
            police_station: self.police_station().to_string(),
            fir_reference: self.fir_number().to_string(),
            year: self.year().to_string(),
            sections: self.sections().to_string(),
        }
    }

    /// Stable hash over all ten fields, used by the loop guard.
    pub fn fingerprint(&self) -> RowFingerprint {
        let mut hasher = blake3::Hasher::new();
        for (idx, field) in self.fields.iter().enumerate() {
            if idx > 0 {
                hasher.update(FINGERPRINT_SEPARATOR);
            }
            hasher.update(field.as_bytes());
        }
        RowFingerprint(*hasher.finalize().as_bytes())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowFingerprint([u8; 32]);

impl fmt::Debug for RowFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RowFingerprint({self})")
    }
}

impl fmt::Display for RowFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

pub fn first_row_fingerprint(rows: &[FirRow]) -> Option<RowFingerprint> {
    rows.first().map(FirRow::fingerprint)
}

/// Decides relevance by exact substring match against the target phrases.
#[derive(Debug, Clone)]
pub struct RowClassifier {
    phrases: Vec<String>,
}

impl RowClassifier {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let phrases = phrases
            .into_iter()
            .map(Into::into)
            .filter(|phrase: &String| !phrase.is_empty())
            .collect();
        Self { phrases }
    }

    /// First configured phrase found in `sections + act_description`.
    pub fn matched_phrase(&self, row: &FirRow) -> Option<&str> {
        let haystack = format!("{}{}", row.sections(), row.act_description());
        self.phrases
            .iter()
            .find(|phrase| haystack.contains(phrase.as_str()))
            .map(String::as_str)
    }

    pub fn is_relevant(&self, row: &FirRow) -> bool {
        self.matched_phrase(row).is_some()
    }
}

impl Default for RowClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_PHRASES.iter().copied())
    }
}

/// Parse every ten-cell row of the result grid.
pub fn extract_rows(html: &str, selectors: &ResultSelectors) -> Vec<FirRow> {
    let document = Html::parse_document(html);
    let pager_nodes: Vec<_> = document.select(&selectors.pager).map(|pager| pager.id()).collect();
    let mut rows = Vec::new();

    for row in document.select(&selectors.row) {
        // A pager with exactly ten page links would otherwise pass as a record.
        if pager_nodes.contains(&row.id())
            || row.ancestors().any(|node| pager_nodes.contains(&node.id()))
        {
            continue;
        }
        let cells: Vec<ElementRef<'_>> = row
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|cell| cell.value().name() == "td")
            .collect();
        if cells.len() != FIELD_COUNT {
            continue;
        }

        let fields: [String; FIELD_COUNT] = std::array::from_fn(|idx| cell_text(&cells[idx]));
        let trigger = cells[COL_DOWNLOAD]
            .select(&selectors.download)
            .find_map(|control| trigger_for(&control));
        rows.push(FirRow::new(fields, trigger));
    }

    rows
}

/// Total record count advertised above the grid, when present.
pub fn total_records_hint(html: &str, selectors: &ResultSelectors) -> Option<u64> {
    let document = Html::parse_document(html);
    let element = document.select(&selectors.total_records).next()?;
    let text = text_content(&element);
    let digits: String = text
        .chars()
        .skip_while(|ch| !ch.is_ascii_digit())
        .take_while(|ch| ch.is_ascii_digit() || *ch == ',')
        .filter(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// The portal renders a visible, non-empty message instead of the grid when a
/// search matches nothing.
pub fn has_no_records_marker(html: &str, selectors: &ResultSelectors) -> bool {
    let document = Html::parse_document(html);
    document
        .select(&selectors.no_records)
        .any(|element| !text_content(&element).is_empty())
}

fn trigger_for(control: &ElementRef<'_>) -> Option<DownloadTrigger> {
    let element = control.value();
    if let Some(id) = element.id().filter(|id| !id.is_empty()) {
        return Some(DownloadTrigger {
            selector: format!("[id=\"{}\"]", escape_attr(id)),
        });
    }
    element
        .attr("name")
        .filter(|name| !name.is_empty())
        .map(|name| DownloadTrigger {
            selector: format!("[name=\"{}\"]", escape_attr(name)),
        })
}

fn escape_attr(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Cell text trimmed at the edges only; inner whitespace is kept so phrase
/// matching sees exactly what the portal rendered.
fn cell_text(element: &ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

pub(crate) fn text_content(element: &ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_html(cells: &[&str], control: &str) -> String {
        let mut html = String::from("<tr>");
        for cell in cells {
            html.push_str(&format!("<td>{cell}</td>"));
        }
        html.push_str(&format!("<td>{control}</td></tr>"));
        html
    }

    fn grid(rows: &[String]) -> String {
        format!(
            "<html><body><span id=\"ContentPlaceHolder1_lbltotalrecord\">Total Records : 1,234</span>\
             <table id=\"ContentPlaceHolder1_gdvDeadBody\"><tr><th>Sr.No.</th><th>State</th></tr>{}\
             <tr class=\"pager\"><td colspan=\"10\"><table><tr><td><span>1</span></td><td><a href=\"#\">2</a></td></tr></table></td></tr>\
             </table></body></html>",
            rows.concat()
        )
    }

    const CELLS: [&str; 9] = [
        "1",
        "Maharashtra",
        "PUNE CITY",
        "  Shivajinagar \n Police ",
        "2024",
        "0012/2024",
        "02/01/2024",
        "11(1)(a)",
        "Prevention of Cruelty to Animals Act, 1960",
    ];

    fn selectors() -> ResultSelectors {
        ResultSelectors::compile(&PortalSelectors::default()).expect("default selectors compile")
    }

    #[test]
    fn keeps_only_ten_cell_rows_with_trimmed_text() {
        let html = grid(&[row_html(
            &CELLS,
            r#"<input type="image" id="ContentPlaceHolder1_gdvDeadBody_btnDownload_0" />"#,
        )]);
        let rows = extract_rows(&html, &selectors());

        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.police_station(), "Shivajinagar \n Police");
        assert_eq!(row.fir_number(), "0012/2024");
        assert_eq!(
            row.trigger,
            Some(DownloadTrigger {
                selector: "[id=\"ContentPlaceHolder1_gdvDeadBody_btnDownload_0\"]".to_string()
            })
        );
    }

    #[test]
    fn falls_back_to_name_attribute_for_trigger() {
        let html = grid(&[row_html(
            &CELLS,
            r#"<input type="submit" name="ctl00$ContentPlaceHolder1$gdvDeadBody$ctl02$btnDownload" />"#,
        )]);
        let rows = extract_rows(&html, &selectors());
        assert_eq!(
            rows[0].trigger.as_ref().map(|t| t.selector.as_str()),
            Some("[name=\"ctl00$ContentPlaceHolder1$gdvDeadBody$ctl02$btnDownload\"]")
        );
    }

    #[test]
    fn row_without_control_has_no_trigger() {
        let html = grid(&[row_html(&CELLS, "")]);
        let rows = extract_rows(&html, &selectors());
        assert_eq!(rows.len(), 1);
        assert!(rows[0].trigger.is_none());
    }

    #[test]
    fn ten_link_pager_is_not_a_record() {
        let links: String = (1..=10)
            .map(|page| format!("<td><a href=\"#\">{page}</a></td>"))
            .collect();
        let html = format!(
            "<table id=\"ContentPlaceHolder1_gdvDeadBody\">{}\
             <tr class=\"pager\"><td colspan=\"10\"><table><tr>{links}</tr></table></td></tr></table>",
            row_html(&CELLS, "")
        );
        let rows = extract_rows(&html, &selectors());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].district(), "PUNE CITY");
    }

    #[test]
    fn reads_total_records_hint() {
        let html = grid(&[]);
        assert_eq!(total_records_hint(&html, &selectors()), Some(1234));
        assert_eq!(total_records_hint("<html></html>", &selectors()), None);
    }

    #[test]
    fn detects_no_records_marker_only_when_text_present() {
        let sel = selectors();
        let empty = r#"<span id="ContentPlaceHolder1_lblNoRecord"></span>"#;
        let filled = r#"<span id="ContentPlaceHolder1_lblNoRecord">No Records Found</span>"#;
        assert!(!has_no_records_marker(empty, &sel));
        assert!(has_no_records_marker(filled, &sel));
    }

    fn row_with(sections: &str, act: &str) -> FirRow {
        let mut fields: [String; FIELD_COUNT] = std::array::from_fn(|_| String::new());
        fields[COL_SECTIONS] = sections.to_string();
        fields[COL_ACT_DESCRIPTION] = act.to_string();
        FirRow::new(fields, None)
    }

    #[test]
    fn classification_is_exact_substring_over_both_fields() {
        let classifier = RowClassifier::default();
        assert!(classifier.is_relevant(&row_with("11", "Prevention of Cruelty to Animals Act")));
        assert!(classifier.is_relevant(&row_with(
            "महाराष्ट्र प्राणी रक्षण अधिनियम 5(अ)",
            ""
        )));
        assert!(!classifier.is_relevant(&row_with("379", "Indian Penal Code")));
        assert!(!classifier.is_relevant(&row_with("", "prevention of cruelty to animals act")));
    }

    #[test]
    fn cell_whitespace_is_not_normalized_before_matching() {
        let mut cells = CELLS;
        cells[COL_ACT_DESCRIPTION] = "  Prevention of Cruelty to\n    Animals Act  ";
        let html = grid(&[row_html(&cells, "")]);

        let rows = extract_rows(&html, &selectors());
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].act_description(),
            "Prevention of Cruelty to\n    Animals Act"
        );
        assert!(!RowClassifier::default().is_relevant(&rows[0]));
    }

    #[test]
    fn classification_spans_the_field_boundary() {
        let classifier = RowClassifier::new(["AnimalsAct"]);
        assert!(classifier.is_relevant(&row_with("Animals", "Act")));
        assert!(!classifier.is_relevant(&row_with("Animals ", "Act")));
    }

    #[test]
    fn classification_matches_iff_some_phrase_is_contained() {
        let phrases = ["alpha", "βeta", "गामा"];
        let classifier = RowClassifier::new(phrases);
        let samples = [
            ("", ""),
            ("xalphax", ""),
            ("", "βeta"),
            ("ALPHA", "BETA"),
            ("गा", "मा"),
            ("beta", "alph"),
        ];
        for (sections, act) in samples {
            let row = row_with(sections, act);
            let joined = format!("{sections}{act}");
            let expected = phrases.iter().any(|p| joined.contains(p));
            assert_eq!(classifier.is_relevant(&row), expected, "{sections:?} + {act:?}");
        }
    }

    #[test]
    fn fingerprint_depends_on_every_field() {
        let a = row_with("11", "x");
        let b = row_with("11", "y");
        assert_eq!(a.fingerprint(), a.clone().fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(first_row_fingerprint(&[]), None);
    }
}
