//! MARCXML record model and the local catalog rewrite rules.
//!
//! Each rule is a pure function from an owned [`MarcRecord`] to a new one,
//! guarded so it is a no-op when its precondition does not hold. The full
//! chain is applied by [`MarcTransformer::apply_cul_rules`].

use crate::error::AppError;
use crate::xml::{Document, Element, Node};

pub const INSTITUTION_CODE: &str = "NNC";
pub const LEGACY_PREFIX: &str = "CULASPC";
pub const SUPPRESSION_FLAG: &str = "965noexportAUTH";
pub const FINDING_AID_LABEL: &str = "Finding aid";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subfield {
    pub code: String,
    pub value: String,
}

impl Subfield {
    pub fn new(code: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Control {
        tag: String,
        value: String,
    },
    Data {
        tag: String,
        ind1: String,
        ind2: String,
        subfields: Vec<Subfield>,
    },
}

impl Field {
    pub fn control(tag: impl Into<String>, value: impl Into<String>) -> Self {
        Field::Control {
            tag: tag.into(),
            value: value.into(),
        }
    }

    pub fn data(tag: impl Into<String>, subfields: Vec<Subfield>) -> Self {
        Field::Data {
            tag: tag.into(),
            ind1: " ".into(),
            ind2: " ".into(),
            subfields,
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Field::Control { tag, .. } | Field::Data { tag, .. } => tag,
        }
    }

    pub fn subfields(&self) -> &[Subfield] {
        match self {
            Field::Data { subfields, .. } => subfields,
            Field::Control { .. } => &[],
        }
    }

    /// Value of the first subfield with `code`.
    pub fn subfield(&self, code: &str) -> Option<&str> {
        self.subfields()
            .iter()
            .find(|s| s.code == code)
            .map(|s| s.value.as_str())
    }

    fn subfields_mut(&mut self) -> Option<&mut Vec<Subfield>> {
        match self {
            Field::Data { subfields, .. } => Some(subfields),
            Field::Control { .. } => None,
        }
    }
}

/// A single MARCXML record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarcRecord {
    pub leader: String,
    pub fields: Vec<Field>,
    /// Namespace prefix used on element names in the source (`marc` for
    /// `marc:record`), kept so output matches input style.
    prefix: Option<String>,
    record_attributes: Vec<(String, String)>,
    /// Attributes of the enclosing `<collection>`, when the source had one.
    collection_attributes: Option<Vec<(String, String)>>,
}

impl MarcRecord {
    pub fn new(leader: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            leader: leader.into(),
            fields,
            prefix: None,
            record_attributes: vec![("xmlns".into(), "http://www.loc.gov/MARC21/slim".into())],
            collection_attributes: None,
        }
    }

    /// Parse a `<record>` or the first record of a `<collection>`.
    pub fn parse(xml: &[u8]) -> Result<Self, AppError> {
        let doc = Document::parse(xml)?;
        let (record, collection_attributes) = match doc.root.local_name() {
            "record" => (&doc.root, None),
            "collection" => {
                let record = doc.root.children_named("record").next().ok_or_else(|| {
                    AppError::MalformedXml("MARC collection contains no record".to_string())
                })?;
                (record, Some(doc.root.attributes.clone()))
            }
            other => {
                return Err(AppError::MalformedXml(format!(
                    "expected a MARC record, found <{other}>"
                )));
            }
        };

        let mut leader = String::new();
        let mut fields = Vec::new();
        for child in record.elements() {
            match child.local_name() {
                "leader" => leader = child.text(),
                "controlfield" => fields.push(Field::Control {
                    tag: child.attribute("tag").unwrap_or_default().to_string(),
                    value: child.text(),
                }),
                "datafield" => fields.push(Field::Data {
                    tag: child.attribute("tag").unwrap_or_default().to_string(),
                    ind1: child.attribute("ind1").unwrap_or(" ").to_string(),
                    ind2: child.attribute("ind2").unwrap_or(" ").to_string(),
                    subfields: child
                        .children_named("subfield")
                        .map(|s| Subfield {
                            code: s.attribute("code").unwrap_or_default().to_string(),
                            value: s.text(),
                        })
                        .collect(),
                }),
                _ => {}
            }
        }

        Ok(Self {
            leader,
            fields,
            prefix: record.name.split_once(':').map(|(p, _)| p.to_string()),
            record_attributes: record.attributes.clone(),
            collection_attributes,
        })
    }

    pub fn to_xml(&self) -> Result<Vec<u8>, AppError> {
        let name = |local: &str| match &self.prefix {
            Some(prefix) => format!("{prefix}:{local}"),
            None => local.to_string(),
        };

        let mut record = Element::new(name("record"));
        record.attributes = self.record_attributes.clone();
        record = record.with_child(Element::new(name("leader")).with_text(&self.leader));

        for field in &self.fields {
            let element = match field {
                Field::Control { tag, value } => Element::new(name("controlfield"))
                    .with_attribute("tag", tag)
                    .with_text(value),
                Field::Data {
                    tag,
                    ind1,
                    ind2,
                    subfields,
                } => {
                    let mut df = Element::new(name("datafield"))
                        .with_attribute("tag", tag)
                        .with_attribute("ind1", ind1)
                        .with_attribute("ind2", ind2);
                    for sf in subfields {
                        df = df.with_child(
                            Element::new(name("subfield"))
                                .with_attribute("code", &sf.code)
                                .with_text(&sf.value),
                        );
                    }
                    df
                }
            };
            record.children.push(Node::Element(element));
        }

        let root = match &self.collection_attributes {
            Some(attrs) => {
                let mut collection = Element::new(name("collection"));
                collection.attributes = attrs.clone();
                // The namespace is declared on the collection already.
                record
                    .attributes
                    .retain(|(k, _)| !attrs.iter().any(|(ak, _)| ak == k));
                collection.with_child(record)
            }
            None => record,
        };

        Document { root }.to_bytes()
    }

    pub fn fields_tagged<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Field> {
        self.fields.iter().filter(move |f| f.tag() == tag)
    }

    pub fn first(&self, tag: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.tag() == tag)
    }

    fn position(&self, tag: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.tag() == tag)
    }
}

/// Inputs shared by every rule.
#[derive(Debug, Clone)]
pub struct RuleContext {
    pub bibid: String,
}

pub type TransformRule = fn(MarcRecord, &RuleContext) -> MarcRecord;

/// The local rule chain, in application order.
pub const CUL_RULES: [(&str, TransformRule); 7] = [
    ("add-control-identifier", ensure_control_identifier),
    ("add-country-code", ensure_institution_code),
    ("rewrite-system-control-number", rewrite_system_control_number),
    ("strip-trailing-name-punctuation", normalize_personal_name),
    ("rewrite-electronic-location", rewrite_electronic_location),
    ("append-suppression-flag", append_suppression_flag),
    ("normalize-corporate-name-punctuation", normalize_corporate_names),
];

/// Insert `001` = bibid right after the leader when no `001` exists.
pub fn ensure_control_identifier(mut record: MarcRecord, ctx: &RuleContext) -> MarcRecord {
    if record.position("001").is_none() {
        record.fields.insert(0, Field::control("001", &ctx.bibid));
    }
    record
}

/// Insert `003` with the institution code right after `001` when missing.
pub fn ensure_institution_code(mut record: MarcRecord, _ctx: &RuleContext) -> MarcRecord {
    if record.position("003").is_none() {
        let at = record.position("001").map_or(0, |i| i + 1);
        record
            .fields
            .insert(at, Field::control("003", INSTITUTION_CODE));
    }
    record
}

/// Rewrite the first `035 $a` from `CULASPC-<bibid>` to the catalog's
/// `(NNC)CULASPC:voyager:<bibid>` form. Exact match only.
pub fn rewrite_system_control_number(mut record: MarcRecord, ctx: &RuleContext) -> MarcRecord {
    let legacy = format!("{LEGACY_PREFIX}-{}", ctx.bibid);
    if let Some(at) = record.position("035") {
        if let Some(subfields) = record.fields[at].subfields_mut() {
            if let Some(sf) = subfields.iter_mut().find(|s| s.code == "a") {
                if sf.value == legacy {
                    sf.value = format!("({INSTITUTION_CODE}){LEGACY_PREFIX}:voyager:{}", ctx.bibid);
                }
            }
        }
    }
    record
}

/// In the `100` heading, strip trailing `,`/`.` from `$d` and drop `$e`.
pub fn normalize_personal_name(mut record: MarcRecord, _ctx: &RuleContext) -> MarcRecord {
    if let Some(at) = record.position("100") {
        if let Some(subfields) = record.fields[at].subfields_mut() {
            subfields.retain(|s| s.code != "e");
            for sf in subfields.iter_mut().filter(|s| s.code == "d") {
                sf.value = sf.value.trim_end_matches([',', '.']).to_string();
            }
        }
    }
    record
}

/// In every `856`, drop `$z` and label the link with `$3 Finding aid`.
pub fn rewrite_electronic_location(mut record: MarcRecord, _ctx: &RuleContext) -> MarcRecord {
    for field in record.fields.iter_mut().filter(|f| f.tag() == "856") {
        if let Some(subfields) = field.subfields_mut() {
            subfields.retain(|s| s.code != "z");
            if !subfields
                .iter()
                .any(|s| s.code == "3" && s.value == FINDING_AID_LABEL)
            {
                subfields.push(Subfield::new("3", FINDING_AID_LABEL));
            }
        }
    }
    record
}

/// Append `965 $a 965noexportAUTH`. Unguarded: running it twice appends twice.
pub fn append_suppression_flag(mut record: MarcRecord, _ctx: &RuleContext) -> MarcRecord {
    record
        .fields
        .push(Field::data("965", vec![Subfield::new("a", SUPPRESSION_FLAG)]));
    record
}

/// For `110` and every `610`: without `$b`, strip one trailing `.`/`,` from
/// `$a`; with `$b`, strip one trailing `,` from the first `$b`.
///
/// One mark per pass: a name ending in two marks (`Acme Co.,`) changes again
/// when the chain is rerun, like the `965` rule.
pub fn normalize_corporate_names(mut record: MarcRecord, _ctx: &RuleContext) -> MarcRecord {
    for field in record
        .fields
        .iter_mut()
        .filter(|f| matches!(f.tag(), "110" | "610"))
    {
        let Some(subfields) = field.subfields_mut() else {
            continue;
        };
        let has_b = subfields.iter().any(|s| s.code == "b");
        if has_b {
            if let Some(b) = subfields.iter_mut().find(|s| s.code == "b") {
                strip_one(&mut b.value, &[',']);
            }
        } else if let Some(a) = subfields.iter_mut().find(|s| s.code == "a") {
            strip_one(&mut a.value, &['.', ',']);
        }
    }
    record
}

fn strip_one(value: &mut String, chars: &[char]) {
    if value.ends_with(chars) {
        value.pop();
    }
}

/// Applies the local rule chain to a record for a given bibid.
#[derive(Debug, Clone)]
pub struct MarcTransformer {
    record: MarcRecord,
    ctx: RuleContext,
}

impl MarcTransformer {
    pub fn new(record: MarcRecord, bibid: impl Into<String>) -> Self {
        Self {
            record,
            ctx: RuleContext {
                bibid: bibid.into(),
            },
        }
    }

    pub fn from_xml(xml: &[u8], bibid: impl Into<String>) -> Result<Self, AppError> {
        Ok(Self::new(MarcRecord::parse(xml)?, bibid))
    }

    /// Run every rule once, in order, returning the transformed record.
    /// The transformer's own record is left untouched.
    pub fn apply_cul_rules(&self) -> MarcRecord {
        CUL_RULES
            .iter()
            .fold(self.record.clone(), |record, (name, rule)| {
                tracing::trace!(rule = %name, bibid = %self.ctx.bibid, "Applying MARC rule");
                rule(record, &self.ctx)
            })
    }
}
