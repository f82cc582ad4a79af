use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder};

// Attribute inside an HTML tag: name, optionally followed by a quoted or bare value.
const ATTRIBUTE_PATTERN: &str = r#"\s+\w+(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^"'>\s]+))?"#;

lazy_static! {
    static ref TAG: Regex = RegexBuilder::new(&format!(r"</?\w+(?:{})*\s*/?>", ATTRIBUTE_PATTERN))
        .case_insensitive(true)
        .build()
        .unwrap();
    static ref ATTRIBUTE: Regex =
        Regex::new(r#"(\w+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^"'>\s]+)))?"#).unwrap();
    static ref ENTITY: Regex = Regex::new(r"&(#x?[0-9a-fA-F]+|\w+);").unwrap();
}

static NAMED_ENTITIES: phf::Map<&'static str, &'static str> = phf::phf_map! {
    "nbsp" => " ", "amp" => "&", "lt" => "<", "gt" => ">", "quot" => "\"",
    "apos" => "'", "szlig" => "ß", "auml" => "ä", "Auml" => "Ä", "ouml" => "ö",
    "Ouml" => "Ö", "uuml" => "ü", "Uuml" => "Ü", "eacute" => "é", "egrave" => "è",
    "agrave" => "à", "aacute" => "á", "ccedil" => "ç", "ntilde" => "ñ",
    "oslash" => "ø", "aring" => "å", "aelig" => "æ", "ndash" => "–",
    "mdash" => "—", "hellip" => "…", "copy" => "©", "reg" => "®", "trade" => "™",
    "euro" => "€", "pound" => "£", "yen" => "¥", "cent" => "¢", "deg" => "°",
    "sect" => "§", "para" => "¶", "laquo" => "«", "raquo" => "»", "lsquo" => "‘",
    "rsquo" => "’", "ldquo" => "“", "rdquo" => "”", "bull" => "•",
    "middot" => "·", "times" => "×", "divide" => "÷", "plusmn" => "±",
    "frac12" => "½", "frac14" => "¼", "sup2" => "²", "sup3" => "³",
};

/// Removes all HTML tags, leaving the text between them.
pub fn strip_tags(s: &str) -> String {
    TAG.replace_all(s, "").into_owned()
}

/// Decodes named entities as well as `&#N;` and `&#xH;` character references.
/// Unknown entities are left untouched.
pub fn decode_html_entities(s: &str) -> String {
    ENTITY
        .replace_all(s, |caps: &regex::Captures| {
            let entity = &caps[1];
            let decoded = if let Some(hex) = entity.strip_prefix("#x").or(entity.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = entity.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                return NAMED_ENTITIES
                    .get(entity)
                    .map(|replacement| (*replacement).to_owned())
                    .unwrap_or_else(|| caps[0].to_owned());
            };
            match decoded {
                Some(c) => c.to_string(),
                None => caps[0].to_owned(),
            }
        })
        .into_owned()
}

/// How to derive the name of a found tag in [`find_named_html_tags`].
#[derive(Debug, Clone)]
pub enum NamePosition {
    /// Use the tag contents as name.
    Contents { regexp: Option<String> },
    /// Use the value of an attribute as name.
    Attribute { name: String, regexp: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AmbiguousNameResolution {
    #[default]
    Replace,
    AddNumber,
}

#[derive(Debug, Clone, Default)]
pub struct FindTagOptions {
    /// Attribute name pattern -> attribute value pattern; all must match.
    pub attributes: Vec<(String, String)>,
    /// Stop after this many matches, 0 means unlimited.
    pub max_count: usize,
    /// Permit self-closing / void tags without contents.
    pub no_content: bool,
    /// Close at the first closing tag even if tags of the same name are nested.
    pub no_nesting: bool,
    /// If set, the contents must match; a capture group overrides the returned contents.
    pub contents_regexp: Option<String>,
    /// Byte offset to start searching at.
    pub position: usize,
    pub name_position: Option<NamePosition>,
    pub ambiguous_name_resolution: AmbiguousNameResolution,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundTag {
    pub contents: String,
    pub position: usize,
    pub end_position: usize,
    pub attributes: IndexMap<String, String>,
    pub name: Option<String>,
}

fn case_insensitive(pattern: &str) -> Option<Regex> {
    match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(rx) => Some(rx),
        Err(why) => {
            log::warn!("invalid pattern {:?}: {}", pattern, why);
            None
        }
    }
}

fn parse_attributes(tag_text: &str) -> IndexMap<String, String> {
    // Skip "<tagname" so the tag name itself is not parsed as an attribute.
    let inner_start = tag_text
        .char_indices()
        .skip(1)
        .find(|(_, c)| !c.is_alphanumeric() && *c != '_')
        .map(|(i, _)| i)
        .unwrap_or(tag_text.len());
    let mut attributes = IndexMap::new();
    for caps in ATTRIBUTE.captures_iter(&tag_text[inner_start..]) {
        let value = caps
            .get(2)
            .or(caps.get(3))
            .or(caps.get(4))
            .map(|m| m.as_str())
            .unwrap_or("");
        attributes.insert(caps[1].to_owned(), value.to_owned());
    }
    attributes
}

fn attributes_match(attributes: &IndexMap<String, String>, required: &[(String, String)]) -> bool {
    required.iter().all(|(name_pattern, value_pattern)| {
        let (Some(name_rx), Some(value_rx)) =
            (case_insensitive(name_pattern), case_insensitive(value_pattern))
        else {
            return false;
        };
        attributes
            .iter()
            .any(|(name, value)| name_rx.is_match(name) && value_rx.is_match(value))
    })
}

fn extract_name(tag: &FoundTag, name_position: &NamePosition) -> Option<String> {
    let (raw, regexp) = match name_position {
        NamePosition::Contents { regexp } => (Some(tag.contents.clone()), regexp),
        NamePosition::Attribute { name, regexp } => (tag.attributes.get(name).cloned(), regexp),
    };
    let raw = raw?;
    match regexp {
        Some(pattern) => {
            let rx = case_insensitive(pattern)?;
            let caps = rx.captures(&raw)?;
            Some(
                caps.get(1)
                    .unwrap_or_else(|| caps.get(0).unwrap())
                    .as_str()
                    .to_owned(),
            )
        }
        None => Some(raw),
    }
}

/// Finds non-overlapping occurrences of the given HTML tag.
/// Nested tags of the same name are skipped over while searching for the
/// closing tag, unless `no_nesting` is set.
pub fn find_html_tags(document: &str, tag_name: &str, options: &FindTagOptions) -> Vec<FoundTag> {
    let escaped = regex::escape(tag_name);
    let open_pattern = if options.no_content {
        format!(r"<{}(?:{})*\s*/?>", escaped, ATTRIBUTE_PATTERN)
    } else {
        format!(r"<{}(?:{})*\s*>", escaped, ATTRIBUTE_PATTERN)
    };
    let (Some(open_rx), Some(close_rx)) = (
        case_insensitive(&open_pattern),
        case_insensitive(&format!(r"</{}\s*>", escaped)),
    ) else {
        return Vec::new();
    };
    let contents_rx = match &options.contents_regexp {
        Some(pattern) => match case_insensitive(pattern) {
            Some(rx) => Some(rx),
            None => return Vec::new(),
        },
        None => None,
    };

    let mut found = Vec::new();
    let mut position = options.position.min(document.len());
    while let Some(open) = open_rx.find_at(document, position) {
        position = open.end();
        let attributes = parse_attributes(open.as_str());
        if !attributes_match(&attributes, &options.attributes) {
            continue;
        }

        let self_closing = open.as_str().ends_with("/>");
        let (contents, end_position) = if self_closing {
            (String::new(), open.end())
        } else {
            match find_closing_tag(document, open.end(), &open_rx, &close_rx, options.no_nesting) {
                Some((contents_end, close_end)) => {
                    (document[open.end()..contents_end].to_owned(), close_end)
                }
                // No closing tag: with noContent the tag is taken as a void
                // tag, otherwise it is skipped.
                None if options.no_content => (String::new(), open.end()),
                None => continue,
            }
        };

        let contents = match &contents_rx {
            Some(rx) => match rx.captures(&contents) {
                Some(caps) => caps
                    .get(1)
                    .unwrap_or_else(|| caps.get(0).unwrap())
                    .as_str()
                    .to_owned(),
                None => {
                    position = end_position.max(position);
                    continue;
                }
            },
            None => contents,
        };

        let mut tag = FoundTag {
            contents,
            position: open.start(),
            end_position,
            attributes,
            name: None,
        };
        if let Some(name_position) = &options.name_position {
            tag.name = extract_name(&tag, name_position);
        }
        found.push(tag);
        position = end_position.max(position);
        if options.max_count > 0 && found.len() >= options.max_count {
            break;
        }
    }
    found
}

fn find_closing_tag(
    document: &str,
    from: usize,
    open_rx: &Regex,
    close_rx: &Regex,
    no_nesting: bool,
) -> Option<(usize, usize)> {
    let mut depth = 1usize;
    let mut search = from;
    loop {
        let close = close_rx.find_at(document, search)?;
        if no_nesting {
            return Some((close.start(), close.end()));
        }
        match open_rx.find_at(document, search) {
            Some(open) if open.start() < close.start() => {
                depth += 1;
                search = open.end();
            }
            _ => {
                depth -= 1;
                if depth == 0 {
                    return Some((close.start(), close.end()));
                }
                search = close.end();
            }
        }
    }
}

pub fn find_first_html_tag(
    document: &str,
    tag_name: &str,
    options: &FindTagOptions,
) -> Option<FoundTag> {
    let mut options = options.clone();
    options.max_count = 1;
    find_html_tags(document, tag_name, &options).into_iter().next()
}

/// Like [`find_html_tags`], but labels every found tag with a name derived
/// via `name_position` and returns them keyed by that name.
pub fn find_named_html_tags(
    document: &str,
    tag_name: &str,
    options: &FindTagOptions,
) -> IndexMap<String, FoundTag> {
    lazy_static! {
        static ref TRAILING_NUMBER: Regex = Regex::new(r"(\d+)$").unwrap();
    }
    let mut named = IndexMap::new();
    for tag in find_html_tags(document, tag_name, options) {
        let Some(name) = tag.name.clone() else {
            continue;
        };
        let key = match options.ambiguous_name_resolution {
            AmbiguousNameResolution::Replace => name,
            AmbiguousNameResolution::AddNumber => {
                let mut key = name;
                while named.contains_key(&key) {
                    key = match TRAILING_NUMBER.captures(&key) {
                        Some(caps) => {
                            let number: u64 = caps[1].parse().unwrap_or(1);
                            format!("{}{}", &key[..key.len() - caps[1].len()], number + 1)
                        }
                        None => format!("{}2", key),
                    };
                }
                key
            }
        };
        named.insert(key, tag);
    }
    named
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_tags_removes_tags_with_attributes() {
        assert_eq!(strip_tags("<td class=\"a b\">x</td>"), "x");
        assert_eq!(strip_tags("a <br/> b"), "a  b");
        assert_eq!(strip_tags("1 < 2 > 3"), "1 < 2 > 3");
    }

    #[test]
    fn decode_named_and_numeric_entities() {
        assert_eq!(decode_html_entities("K&ouml;ln&nbsp;Hbf"), "Köln Hbf");
        assert_eq!(decode_html_entities("&#65;&#x42;"), "AB");
        assert_eq!(decode_html_entities("&unknownentity;"), "&unknownentity;");
    }

    #[test]
    fn finds_tags_with_attribute_constraints() {
        let doc = r#"<td class="time">08:15</td><td class="line">S1</td>"#;
        let options = FindTagOptions {
            attributes: vec![("class".to_owned(), "^line$".to_owned())],
            ..Default::default()
        };
        let tags = find_html_tags(doc, "td", &options);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].contents, "S1");
        assert_eq!(tags[0].attributes.get("class").unwrap(), "line");
    }

    #[test]
    fn nested_tags_are_scanned_to_the_matching_close() {
        let doc = "<div>a<div>b</div>c</div><div>d</div>";
        let tags = find_html_tags(doc, "div", &FindTagOptions::default());
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].contents, "a<div>b</div>c");
        assert_eq!(tags[1].contents, "d");
    }

    #[test]
    fn no_nesting_closes_at_first_closing_tag() {
        let doc = "<div>a<div>b</div>c</div>";
        let options = FindTagOptions {
            no_nesting: true,
            ..Default::default()
        };
        let tags = find_html_tags(doc, "div", &options);
        assert_eq!(tags[0].contents, "a<div>b");
    }

    #[test]
    fn contents_regexp_capture_group_overrides_contents() {
        let doc = "<span>dep 08:15 x</span>";
        let options = FindTagOptions {
            contents_regexp: Some(r"(\d{2}:\d{2})".to_owned()),
            ..Default::default()
        };
        let tags = find_html_tags(doc, "span", &options);
        assert_eq!(tags[0].contents, "08:15");
    }

    #[test]
    fn named_tags_add_number_on_ambiguity() {
        let doc = r#"<th name="col">A</th><th name="col">B</th>"#;
        let options = FindTagOptions {
            no_content: true,
            name_position: Some(NamePosition::Attribute {
                name: "name".to_owned(),
                regexp: None,
            }),
            ambiguous_name_resolution: AmbiguousNameResolution::AddNumber,
            ..Default::default()
        };
        let named = find_named_html_tags(doc, "th", &options);
        assert!(named.contains_key("col"));
        assert!(named.contains_key("col2"));
    }

    #[test]
    fn max_count_limits_results() {
        let doc = "<li>1</li><li>2</li><li>3</li>";
        let options = FindTagOptions {
            max_count: 2,
            ..Default::default()
        };
        assert_eq!(find_html_tags(doc, "li", &options).len(), 2);
    }
}
