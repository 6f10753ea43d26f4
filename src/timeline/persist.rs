//! XML encoding of timeline definitions.
//!
//! Each element variant has its own encode/decode pair so the attribute set is an
//! explicit contract. Element order is written exactly as held in memory.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::activity::{ActivityElement, NoticeDevice};
use super::subroutine::SubroutineElement;
use super::sync_pattern::SyncPattern;
use super::time_text::{format_time, parse_time};
use super::trigger::{DefaultElement, TriggerElement};
use super::{Element, Locale, TimelineDefinition};
use crate::error::{Result, TimelineError};

const ROOT_TAG: &str = "timeline";
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const IN_MEMORY_SOURCE: &str = "<memory>";

impl TimelineDefinition {
    /// Reads a definition file. A missing or zero-length file is `Ok(None)`.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(TimelineError::io(path, error)),
        };

        if bytes.is_empty() {
            return Ok(None);
        }

        let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes);
        let text = std::str::from_utf8(bytes)
            .map_err(|error| TimelineError::parse(path, format!("invalid UTF-8: {error}")))?;

        let mut definition =
            decode_definition(text).map_err(|message| TimelineError::parse(path, message))?;
        definition.file = Some(path.to_path_buf());

        for unresolved in definition.unresolved_targets() {
            tracing::warn!(
                timeline = %definition.name,
                file = %path.display(),
                element = %unresolved.element,
                target = %unresolved.target,
                is_call = unresolved.is_call,
                "Jump target does not resolve; statement will fall through"
            );
        }

        Ok(Some(definition))
    }

    pub fn from_xml(text: &str) -> Result<Self> {
        decode_definition(text).map_err(|message| TimelineError::parse(IN_MEMORY_SOURCE, message))
    }

    pub fn to_xml(&self) -> Result<String> {
        let bytes = encode_definition(self)
            .map_err(|error| TimelineError::io(IN_MEMORY_SOURCE, std::io::Error::other(error)))?;
        String::from_utf8(bytes).map_err(|error| {
            TimelineError::io(
                IN_MEMORY_SOURCE,
                std::io::Error::new(ErrorKind::InvalidData, error),
            )
        })
    }

    /// Writes the definition as UTF-8 without a byte-order mark.
    ///
    /// Callers sharing a definition must serialize saves themselves;
    /// `TimelineHandle::save` does so with a per-definition lock.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|error| TimelineError::io(parent, error))?;
        }

        let mut contents = self.to_xml()?;
        contents.push('\n');
        std::fs::write(path, contents).map_err(|error| TimelineError::io(path, error))?;

        tracing::debug!(timeline = %self.name, file = %path.display(), "Saved timeline definition");
        Ok(())
    }

    pub(crate) fn source_path(&self) -> Option<PathBuf> {
        self.file.clone()
    }
}

struct Attributes(HashMap<String, String>);

impl Attributes {
    fn read(start: &BytesStart<'_>) -> Result<Self, String> {
        let mut values = HashMap::new();
        for attribute in start.attributes() {
            let attribute = attribute.map_err(|error| error.to_string())?;
            let key = String::from_utf8_lossy(attribute.key.as_ref()).to_string();
            let value = attribute
                .unescape_value()
                .map_err(|error| error.to_string())?
                .to_string();
            values.insert(key, value);
        }
        Ok(Self(values))
    }

    fn text(&self, key: &str) -> Option<String> {
        self.0.get(key).cloned()
    }

    fn str(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    fn number(&self, key: &str) -> Option<f64> {
        self.str(key).and_then(|value| value.trim().parse::<f64>().ok())
    }
}

fn tag_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.name().as_ref()).to_string()
}

fn decode_definition(text: &str) -> Result<TimelineDefinition, String> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event().map_err(|error| error.to_string())? {
            Event::Start(start) if tag_name(&start) == ROOT_TAG => break,
            Event::Empty(start) if tag_name(&start) == ROOT_TAG => {
                return Ok(TimelineDefinition::default());
            }
            Event::Start(start) | Event::Empty(start) => {
                return Err(format!("unexpected root element <{}>", tag_name(&start)));
            }
            Event::Eof => return Err(format!("missing <{ROOT_TAG}> root element")),
            _ => {}
        }
    }

    let mut definition = TimelineDefinition::default();
    loop {
        match reader.read_event().map_err(|error| error.to_string())? {
            Event::Start(start) => match tag_name(&start).as_str() {
                "name" => definition.name = read_text_content(&mut reader, "name")?,
                "zone" => definition.zone = read_text_content(&mut reader, "zone")?,
                "locale" => {
                    let value = read_text_content(&mut reader, "locale")?;
                    definition.locale = Locale::parse(&value)
                        .ok_or_else(|| format!("unknown locale '{value}'"))?;
                }
                "s" => {
                    let subroutine = decode_subroutine(&mut reader, &start)?;
                    definition.add(Element::Subroutine(subroutine));
                }
                _ => {
                    if let Some(element) = decode_leaf(&start)? {
                        definition.add(element);
                    }
                    reader
                        .read_to_end(start.name())
                        .map_err(|error| error.to_string())?;
                }
            },
            Event::Empty(start) => {
                if tag_name(&start) == "s" {
                    let attributes = Attributes::read(&start)?;
                    definition.add(Element::Subroutine(SubroutineElement {
                        name: attributes.text("name"),
                        ..SubroutineElement::default()
                    }));
                } else if let Some(element) = decode_leaf(&start)? {
                    definition.add(element);
                }
            }
            Event::End(end) if end.name().as_ref() == ROOT_TAG.as_bytes() => break,
            Event::Eof => return Err(format!("unterminated <{ROOT_TAG}> element")),
            _ => {}
        }
    }

    Ok(definition)
}

fn read_text_content(reader: &mut Reader<&[u8]>, tag: &str) -> Result<String, String> {
    let mut content = String::new();
    loop {
        match reader.read_event().map_err(|error| error.to_string())? {
            Event::Text(text) => {
                content.push_str(&text.unescape().map_err(|error| error.to_string())?);
            }
            Event::CData(data) => {
                content.push_str(&String::from_utf8_lossy(&data.into_inner()));
            }
            Event::End(end) if end.name().as_ref() == tag.as_bytes() => return Ok(content),
            Event::Eof => return Err(format!("unterminated <{tag}> element")),
            _ => {}
        }
    }
}

/// Decodes `default`, `a` and `t`. Unknown tags are skipped.
fn decode_leaf(start: &BytesStart<'_>) -> Result<Option<Element>, String> {
    let element = match tag_name(start).as_str() {
        "default" => Element::Default(decode_default(&Attributes::read(start)?)),
        "a" => Element::Activity(decode_activity(&Attributes::read(start)?)?),
        "t" => Element::Trigger(decode_trigger(&Attributes::read(start)?)),
        other => {
            tracing::debug!(tag = other, "Skipping unknown timeline element");
            return Ok(None);
        }
    };
    Ok(Some(element))
}

fn decode_subroutine(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart<'_>,
) -> Result<SubroutineElement, String> {
    let attributes = Attributes::read(start)?;
    let mut subroutine = SubroutineElement {
        name: attributes.text("name"),
        ..SubroutineElement::default()
    };

    loop {
        match reader.read_event().map_err(|error| error.to_string())? {
            Event::Start(child) => {
                if let Some(element) = decode_leaf(&child)? {
                    subroutine.add(element);
                }
                reader
                    .read_to_end(child.name())
                    .map_err(|error| error.to_string())?;
            }
            Event::Empty(child) => {
                if let Some(element) = decode_leaf(&child)? {
                    subroutine.add(element);
                }
            }
            Event::End(end) if end.name().as_ref() == b"s" => return Ok(subroutine),
            Event::Eof => return Err("unterminated <s> element".to_string()),
            _ => {}
        }
    }
}

fn decode_activity(attributes: &Attributes) -> Result<ActivityElement, String> {
    let time = match attributes.str("time") {
        Some(value) => parse_time(value).map_err(|error| error.to_string())?,
        None => Default::default(),
    };

    Ok(ActivityElement {
        name: attributes.text("name"),
        time,
        text: attributes.text("text"),
        sync: SyncPattern::from_attribute(attributes.str("sync")),
        sync_offset_start: attributes.number("sync-s"),
        sync_offset_end: attributes.number("sync-e"),
        goto: attributes.text("goto"),
        call: attributes.text("call"),
        notice: attributes.text("notice"),
        notice_device: attributes.str("notice-d").and_then(NoticeDevice::parse),
        notice_offset: attributes.number("notice-o"),
        style: attributes.text("style"),
        ..ActivityElement::default()
    })
}

fn decode_trigger(attributes: &Attributes) -> TriggerElement {
    TriggerElement {
        name: attributes.text("name"),
        text: attributes.text("text"),
        sync: SyncPattern::from_attribute(attributes.str("sync")),
        notice: attributes.text("notice"),
        notice_device: attributes.str("notice-d").and_then(NoticeDevice::parse),
        goto: attributes.text("goto"),
        call: attributes.text("call"),
        ..TriggerElement::default()
    }
}

fn decode_default(attributes: &Attributes) -> DefaultElement {
    DefaultElement {
        name: attributes.text("name"),
        target_element: attributes.text("target-element"),
        target_attribute: attributes.text("target-attr"),
        value: attributes.text("value"),
        ..DefaultElement::default()
    }
}

fn encode_definition(definition: &TimelineDefinition) -> Result<Vec<u8>, String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    write(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)),
    )?;
    write(&mut writer, Event::Start(BytesStart::new(ROOT_TAG)))?;

    for (tag, value) in [
        ("name", definition.name.as_str()),
        ("zone", definition.zone.as_str()),
        ("locale", definition.locale.as_str()),
    ] {
        write(&mut writer, Event::Start(BytesStart::new(tag)))?;
        write(&mut writer, Event::Text(BytesText::new(value)))?;
        write(&mut writer, Event::End(BytesEnd::new(tag)))?;
    }

    for element in definition.elements() {
        match element {
            Element::Default(default) => write(&mut writer, Event::Empty(encode_default(default)))?,
            Element::Activity(activity) => {
                write(&mut writer, Event::Empty(encode_activity(activity)))?
            }
            Element::Trigger(trigger) => write(&mut writer, Event::Empty(encode_trigger(trigger)))?,
            Element::Subroutine(subroutine) => {
                let mut start = BytesStart::new("s");
                push_optional(&mut start, "name", subroutine.name.as_deref());
                write(&mut writer, Event::Start(start))?;
                for statement in subroutine.statements() {
                    write(&mut writer, Event::Empty(encode_activity(statement)))?;
                }
                write(&mut writer, Event::End(BytesEnd::new("s")))?;
            }
        }
    }

    write(&mut writer, Event::End(BytesEnd::new(ROOT_TAG)))?;
    Ok(writer.into_inner())
}

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), String> {
    writer.write_event(event).map_err(|error| error.to_string())
}

fn push_optional(start: &mut BytesStart<'_>, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        start.push_attribute((key, value));
    }
}

fn push_number(start: &mut BytesStart<'_>, key: &str, value: Option<f64>) {
    if let Some(value) = value {
        start.push_attribute((key, value.to_string().as_str()));
    }
}

fn encode_activity(activity: &ActivityElement) -> BytesStart<'static> {
    let mut start = BytesStart::new("a");
    push_optional(&mut start, "name", activity.name.as_deref());
    start.push_attribute(("time", format_time(activity.time).as_str()));
    push_optional(&mut start, "text", activity.text.as_deref());
    push_optional(
        &mut start,
        "sync",
        activity.sync.as_ref().map(SyncPattern::source),
    );
    push_number(&mut start, "sync-s", activity.sync_offset_start);
    push_number(&mut start, "sync-e", activity.sync_offset_end);
    push_optional(&mut start, "goto", activity.goto.as_deref());
    push_optional(&mut start, "call", activity.call.as_deref());
    push_optional(&mut start, "notice", activity.notice.as_deref());
    push_optional(
        &mut start,
        "notice-d",
        activity.notice_device.as_ref().map(NoticeDevice::as_str),
    );
    push_number(&mut start, "notice-o", activity.notice_offset);
    push_optional(&mut start, "style", activity.style.as_deref());
    start
}

fn encode_trigger(trigger: &TriggerElement) -> BytesStart<'static> {
    let mut start = BytesStart::new("t");
    push_optional(&mut start, "name", trigger.name.as_deref());
    push_optional(&mut start, "text", trigger.text.as_deref());
    push_optional(
        &mut start,
        "sync",
        trigger.sync.as_ref().map(SyncPattern::source),
    );
    push_optional(&mut start, "notice", trigger.notice.as_deref());
    push_optional(
        &mut start,
        "notice-d",
        trigger.notice_device.as_ref().map(NoticeDevice::as_str),
    );
    push_optional(&mut start, "goto", trigger.goto.as_deref());
    push_optional(&mut start, "call", trigger.call.as_deref());
    start
}

fn encode_default(default: &DefaultElement) -> BytesStart<'static> {
    let mut start = BytesStart::new("default");
    push_optional(&mut start, "name", default.name.as_deref());
    push_optional(&mut start, "target-element", default.target_element.as_deref());
    push_optional(&mut start, "target-attr", default.target_attribute.as_deref());
    push_optional(&mut start, "value", default.value.as_deref());
    start
}
