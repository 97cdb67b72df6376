// Parser for filter expressions embedded in a request path
// Supports paths like: /v(hdr10,hvc)/a(mp4a,l(pt-BR,en),b(10,20))/b(100,4000)/test.m3u8

use std::sync::Arc;

use tracing::debug;

use super::codec::{HDR10, HDR10_PREFIXES};
use super::{push_unique, FilterSet, NestedFilter, Protocol, Range, Tags, Trim};
use crate::config::FilterConfig;
use crate::errors::ParseError;
use crate::utils::time::Clock;

/// One node of the filter grammar: a bare atom or a `key(args)` group
#[derive(Debug, Clone, PartialEq, Eq)]
enum Term {
    Atom(String),
    Group { key: String, args: Vec<Term> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Video,
    Audio,
    Captions,
}

impl Kind {
    fn tag(&self) -> &'static str {
        match self {
            Kind::Video => "Video",
            Kind::Audio => "Audio",
            Kind::Captions => "Captions",
        }
    }
}

/// Error tag reported for a top-level key
fn key_tag(key: &str) -> &str {
    match key {
        "v" => "Video",
        "a" => "Audio",
        "c" => "Captions",
        "ct" => "Content Type",
        "l" => "Language",
        "b" => "Bitrate",
        "t" => "Trim",
        "tags" => "Tags",
        "fps" => "Frame Rate",
        "dw" => "De-Weave",
        other => other,
    }
}

#[derive(Debug, Clone)]
pub struct FilterParser {
    config: FilterConfig,
    clock: Arc<dyn Clock>,
}

impl FilterParser {
    pub fn new(config: FilterConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    /// Parse a request path into the stripped manifest path and its filters.
    ///
    /// Example: `/v(hdr10,hvc)/b(100,4000)/live/test.m3u8` yields `/live/test.m3u8`
    pub fn parse(&self, path: &str) -> Result<(String, FilterSet), ParseError> {
        let mut filters = FilterSet::default();
        let mut components: Vec<&str> = Vec::new();

        for raw in path.split('/').filter(|s| !s.is_empty()) {
            let segment = urlencoding::decode(raw)
                .map_err(|e| ParseError::new("Path", format!("invalid encoding in '{raw}': {e}")))?;

            if let Some(term) = parse_segment(&segment)? {
                self.apply(&mut filters, term)?;
            } else if let Some(names) = plugin_marker(&segment) {
                for name in names {
                    push_unique(&mut filters.plugins, name);
                }
            } else {
                components.push(raw);
            }
        }

        let manifest_path = format!("/{}", components.join("/"));
        filters.protocol = Protocol::from_path(&manifest_path).ok_or_else(|| {
            ParseError::new(
                "Protocol",
                format!("'{manifest_path}' is neither an .m3u8 nor an .mpd manifest"),
            )
        })?;
        filters.fold_bitrate();

        debug!(
            target = "manifest.parser",
            path = path,
            manifest = %manifest_path,
            protocol = ?filters.protocol,
            "parsed filter path"
        );

        Ok((manifest_path, filters))
    }

    /// Apply one top-level `key(args)` group
    fn apply(&self, filters: &mut FilterSet, term: Term) -> Result<(), ParseError> {
        let Term::Group { key, args } = term else {
            return Ok(());
        };
        let tag = key_tag(&key);

        match key.as_str() {
            "v" => self.nested(&mut filters.videos, Kind::Video, args),
            "a" => self.nested(&mut filters.audios, Kind::Audio, args),
            "c" => self.nested(&mut filters.captions, Kind::Captions, args),
            "ct" => {
                for content_type in atoms(tag, args)? {
                    if !self.config.content_types.contains(&content_type) {
                        return Err(ParseError::new(
                            tag,
                            format!("content type '{content_type}' is not supported"),
                        ));
                    }
                    push_unique(&mut filters.content_types, content_type);
                }
                Ok(())
            }
            "l" => {
                for lang in atoms(tag, args)? {
                    push_unique(&mut filters.audios.language, lang.clone());
                    push_unique(&mut filters.captions.language, lang);
                }
                Ok(())
            }
            "b" => {
                filters.bitrate = Some(parse_range(tag, &args, self.config.max_bitrate)?);
                Ok(())
            }
            "t" => {
                let now = self.clock.now().timestamp();
                let window = parse_range(tag, &args, now)?;
                filters.trim = Some(Trim {
                    start: window.min * 1000,
                    end: window.max * 1000,
                });
                Ok(())
            }
            "tags" => {
                let mut tags = filters.tags.unwrap_or_default();
                for name in atoms(tag, args)? {
                    match name.as_str() {
                        "ads" => tags.ads = true,
                        "iframe" | "i-frame" => tags.iframe = true,
                        other => {
                            return Err(ParseError::new(tag, format!("unknown tag '{other}'")))
                        }
                    }
                }
                filters.tags = Some(tags);
                Ok(())
            }
            "fps" => {
                for rate in atoms(tag, args)? {
                    push_unique(&mut filters.frame_rates, rate.replace(':', "/"));
                }
                Ok(())
            }
            "dw" => {
                let values = atoms(tag, args)?;
                filters.deweave = match values.as_slice() {
                    [v] if v == "true" => true,
                    [v] if v == "false" => false,
                    _ => {
                        return Err(ParseError::new(
                            tag,
                            format!("expected exactly one of true/false, got {values:?}"),
                        ))
                    }
                };
                Ok(())
            }
            _ => Err(ParseError::new(tag, "unsupported filter key")),
        }
    }

    /// Apply the body of a `v(...)`, `a(...)` or `c(...)` group
    fn nested(&self, filter: &mut NestedFilter, kind: Kind, args: Vec<Term>) -> Result<(), ParseError> {
        let tag = kind.tag();
        for term in args {
            match term {
                Term::Atom(codec) => self.push_codec(filter, kind, codec)?,
                Term::Group { key, args } => match key.as_str() {
                    "co" => {
                        for codec in atoms(tag, args)? {
                            self.push_codec(filter, kind, codec)?;
                        }
                    }
                    "b" => filter.bitrate = Some(parse_range(tag, &args, self.config.max_bitrate)?),
                    "l" if kind != Kind::Video => {
                        for lang in atoms(tag, args)? {
                            push_unique(&mut filter.language, lang);
                        }
                    }
                    other => {
                        return Err(ParseError::new(
                            tag,
                            format!("unsupported nested key '{other}'"),
                        ))
                    }
                },
            }
        }
        Ok(())
    }

    fn push_codec(&self, filter: &mut NestedFilter, kind: Kind, codec: String) -> Result<(), ParseError> {
        let supported = match kind {
            Kind::Video => &self.config.video_codecs,
            Kind::Audio => &self.config.audio_codecs,
            Kind::Captions => &self.config.caption_codecs,
        };
        if !supported.contains(&codec) {
            return Err(ParseError::new(
                kind.tag(),
                format!("codec '{codec}' is not supported"),
            ));
        }

        if codec == HDR10 {
            for prefix in HDR10_PREFIXES {
                push_unique(&mut filter.codecs, prefix);
            }
        } else {
            push_unique(&mut filter.codecs, codec);
        }
        Ok(())
    }
}

/// Parse a path segment of the form `key(args)`; `None` means it is not a filter
fn parse_segment(segment: &str) -> Result<Option<Term>, ParseError> {
    let Some(open) = segment.find('(') else {
        return Ok(None);
    };
    let key = &segment[..open];
    if !segment.ends_with(')') || !is_key(key) {
        return Ok(None);
    }

    let chars: Vec<char> = segment[open + 1..].chars().collect();
    let mut pos = 0;
    let args = parse_list(&chars, &mut pos).map_err(|e| ParseError::new(key_tag(key), e))?;

    // parse_list stops on the group's closing paren, which must end the segment
    if pos + 1 != chars.len() {
        return Err(ParseError::new(
            key_tag(key),
            format!("unexpected characters after position {pos} in '{segment}'"),
        ));
    }

    Ok(Some(Term::Group {
        key: key.to_string(),
        args,
    }))
}

/// Parse a comma separated argument list, stopping on (not consuming) its `)`
fn parse_list(chars: &[char], pos: &mut usize) -> Result<Vec<Term>, String> {
    let mut terms = Vec::new();
    if chars.get(*pos) == Some(&')') {
        return Ok(terms);
    }

    loop {
        terms.push(parse_item(chars, pos)?);
        match chars.get(*pos) {
            Some(',') => *pos += 1,
            Some(')') => return Ok(terms),
            Some(c) => return Err(format!("unexpected '{c}' at position {}", *pos)),
            None => return Err("missing closing parenthesis".to_string()),
        }
    }
}

/// Parse an atom or a nested `key(args)` group
fn parse_item(chars: &[char], pos: &mut usize) -> Result<Term, String> {
    let start = *pos;
    while let Some(c) = chars.get(*pos) {
        if matches!(c, ',' | '(' | ')') {
            break;
        }
        *pos += 1;
    }
    let word: String = chars[start..*pos].iter().collect();
    let word = word.trim().to_string();

    if chars.get(*pos) != Some(&'(') {
        return Ok(Term::Atom(word));
    }

    if !is_key(&word) {
        return Err(format!("invalid group key '{word}'"));
    }
    *pos += 1; // consume '('
    let args = parse_list(chars, pos)?;
    if chars.get(*pos) != Some(&')') {
        return Err("missing closing parenthesis".to_string());
    }
    *pos += 1; // consume ')'
    Ok(Term::Group { key: word, args })
}

fn is_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// `[name1,name2]` plugin marker
fn plugin_marker(segment: &str) -> Option<Vec<String>> {
    let inner = segment.strip_prefix('[')?.strip_suffix(']')?;
    Some(
        inner
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
    )
}

/// Flatten an argument list that may only contain atoms
fn atoms(tag: &str, args: Vec<Term>) -> Result<Vec<String>, ParseError> {
    args.into_iter()
        .map(|term| match term {
            Term::Atom(value) if !value.is_empty() => Ok(value),
            Term::Atom(_) => Err(ParseError::new(tag, "empty value")),
            Term::Group { key, .. } => Err(ParseError::new(
                tag,
                format!("unexpected nested group '{key}'"),
            )),
        })
        .collect()
}

/// Parse `(min,max)`; empty bounds default to 0 and `ceiling`
fn parse_range(tag: &str, args: &[Term], ceiling: i64) -> Result<Range, ParseError> {
    let [Term::Atom(min), Term::Atom(max)] = args else {
        return Err(ParseError::new(tag, "expected a (min,max) range"));
    };

    let bound = |value: &str, default: i64| -> Result<i64, ParseError> {
        if value.is_empty() {
            return Ok(default);
        }
        value
            .parse::<i64>()
            .map_err(|_| ParseError::new(tag, format!("'{value}' is not a number")))
    };
    let min = bound(min.as_str(), 0)?;
    let max = bound(max.as_str(), ceiling)?;

    if min < 0 || max > ceiling || min >= max {
        return Err(ParseError::new(
            tag,
            format!("invalid range ({min}, {max}): require 0 <= min < max <= {ceiling}"),
        ));
    }
    Ok(Range { min, max })
}
