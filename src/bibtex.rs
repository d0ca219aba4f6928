use nom::IResult;
use nom::branch::alt;
use nom::bytes::complete::{is_not, take_until, take_while, take_while1};
use nom::character::complete::{char, multispace0};
use nom::combinator::{map, recognize};
use nom::multi::{many0, separated_list1};
use nom::sequence::{delimited, preceded, terminated, tuple};

use crate::domain::{CitationRecord, Doi};
use crate::error::HarvestError;
use crate::similarity::{normalize_title, surname};

const VENUE_FIELDS: [&str; 4] = ["journal", "booktitle", "publisher", "school"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BibtexEntry {
    pub entry_type: String,
    pub key: String,
    pub fields: Vec<(String, String)>,
}

impl BibtexEntry {
    pub fn new(entry_type: &str, key: &str) -> Self {
        Self {
            entry_type: entry_type.to_lowercase(),
            key: key.to_string(),
            fields: Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(field, _)| field == name) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((name.to_string(), value)),
        }
    }

    pub fn render(&self) -> String {
        let mut out = format!("@{}{{{},\n", self.entry_type, self.key);
        for (name, value) in &self.fields {
            out.push_str(&format!(" {name} = {{{value}}},\n"));
        }
        out.push_str("}\n");
        out
    }
}

pub fn parse_entry(text: &str) -> Result<BibtexEntry, HarvestError> {
    let (_, entry) = preceded(take_until("@"), bibtex_entry)(text).map_err(|err| match err {
        nom::Err::Incomplete(_) => HarvestError::BibtexParse("unterminated entry".to_string()),
        nom::Err::Error(err) | nom::Err::Failure(err) => HarvestError::BibtexParse(format!(
            "{:?} near {:?}",
            err.code,
            err.input.chars().take(24).collect::<String>()
        )),
    })?;
    Ok(entry)
}

fn bibtex_entry(input: &str) -> IResult<&str, BibtexEntry> {
    let (rest, entry_type) = preceded(
        terminated(char('@'), multispace0),
        take_while1(|c: char| c.is_ascii_alphanumeric()),
    )(input)?;
    let (rest, open) = preceded(multispace0, alt((char('{'), char('('))))(rest)?;
    let close = if open == '{' { '}' } else { ')' };
    let (rest, key) = preceded(
        multispace0,
        take_while(|c: char| c != ',' && c != close && !c.is_whitespace()),
    )(rest)?;

    let mut entry = BibtexEntry::new(entry_type, key);
    let mut remaining = rest;
    loop {
        let (rest, _) = take_while(|c: char| c.is_whitespace() || c == ',')(remaining)?;
        if let Some(rest) = rest.strip_prefix(close) {
            return Ok((rest, entry));
        }
        let (rest, (name, value)) = field(rest)?;
        entry.fields.push((name.to_lowercase(), collapse(&value)));
        remaining = rest;
    }
}

fn field(input: &str) -> IResult<&str, (&str, String)> {
    tuple((
        take_while1(|c: char| c.is_ascii_alphanumeric() || "_-:.".contains(c)),
        preceded(delimited(multispace0, char('='), multispace0), value),
    ))(input)
}

fn value(input: &str) -> IResult<&str, String> {
    map(
        separated_list1(
            delimited(multispace0, char('#'), multispace0),
            alt((
                braced,
                quoted,
                take_while1(|c: char| c.is_alphanumeric() || "_-.:/+".contains(c)),
            )),
        ),
        |parts: Vec<&str>| parts.concat(),
    )(input)
}

fn braced(input: &str) -> IResult<&str, &str> {
    delimited(char('{'), balanced, char('}'))(input)
}

fn quoted(input: &str) -> IResult<&str, &str> {
    delimited(
        char('"'),
        recognize(many0(alt((is_not("\"{}"), recognize(braced))))),
        char('"'),
    )(input)
}

fn balanced(input: &str) -> IResult<&str, &str> {
    recognize(many0(alt((is_not("{}"), recognize(braced)))))(input)
}

pub fn citation_from_bibtex(text: &str, doi: &Doi) -> Result<CitationRecord, HarvestError> {
    let mut entry = parse_entry(text)?;
    let authors = entry.field("author").map(split_authors).unwrap_or_default();
    if !authors.is_empty() {
        entry.set("author", authors.join(" and "));
    }
    let title = entry.field("title").map(strip_braces).unwrap_or_default();
    let year = entry.field("year").and_then(parse_year);
    if entry.key.is_empty() {
        entry.key = generate_cite_key(&authors, year, &title);
    }
    entry.set("link", doi.link());

    Ok(CitationRecord {
        cite_key: entry.key.clone(),
        entry_type: entry.entry_type.clone(),
        title,
        authors,
        year,
        venue: VENUE_FIELDS
            .iter()
            .find_map(|name| entry.field(name))
            .map(strip_braces),
        identifier: Some(
            entry
                .field("doi")
                .map(str::to_string)
                .unwrap_or_else(|| doi.as_str().to_string()),
        ),
        link: Some(doi.link()),
        raw: entry.render(),
    })
}

/// Author lists arrive either BibTeX style (`A and B`) or `;`-separated.
pub fn split_authors(value: &str) -> Vec<String> {
    value
        .trim()
        .trim_end_matches(';')
        .split(" and ")
        .flat_map(|part| part.split("; "))
        .map(|part| collapse(part.trim().trim_end_matches(';')))
        .filter(|part| !part.is_empty())
        .collect()
}

/// `surnameYEARfirstword`, e.g. `hanheide2020robot`.
pub fn generate_cite_key(authors: &[String], year: Option<i32>, title: &str) -> String {
    let family = authors
        .first()
        .map(|author| surname(author).replace(' ', ""))
        .filter(|family| !family.is_empty())
        .unwrap_or_else(|| "anon".to_string());
    let word = normalize_title(title)
        .split_whitespace()
        .find(|word| word.len() > 3)
        .unwrap_or_default()
        .to_string();
    match year {
        Some(year) => format!("{family}{year}{word}"),
        None => format!("{family}{word}"),
    }
}

pub fn strip_braces(value: &str) -> String {
    collapse(&value.replace(['{', '}'], ""))
}

fn parse_year(value: &str) -> Option<i32> {
    let digits: String = value.chars().filter(char::is_ascii_digit).take(4).collect();
    (digits.len() == 4).then(|| digits.parse().ok()).flatten()
}

fn collapse(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
