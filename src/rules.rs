// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::{BTreeSet, HashMap};

use address::Flavor;
use interpreter::RawValue;

///
/// The shape an attribute value must have to satisfy a rule type's schema.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AttrKind {
    String,
    Number,
    Bool,
    StringList,
}

impl AttrKind {
    pub(crate) fn admits(&self, value: &RawValue) -> bool {
        match self {
            AttrKind::String => matches!(value, RawValue::String(_)),
            AttrKind::Number => matches!(value, RawValue::Number(_)),
            AttrKind::Bool => matches!(value, RawValue::Bool(_)),
            AttrKind::StringList => value.as_string_list().is_some(),
        }
    }

    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            AttrKind::String => "string",
            AttrKind::Number => "number",
            AttrKind::Bool => "bool",
            AttrKind::StringList => "list of strings",
        }
    }
}

#[derive(Clone, Debug)]
pub struct AttrSpec {
    pub name: &'static str,
    pub kind: AttrKind,
    pub required: bool,
}

///
/// The flavors a rule type admits: either none at all, or an explicit set.
///
#[derive(Clone, Debug)]
pub enum FlavorDomain {
    Unsupported,
    Of(BTreeSet<Flavor>),
}

impl FlavorDomain {
    pub fn of<I: IntoIterator<Item = Flavor>>(flavors: I) -> FlavorDomain {
        FlavorDomain::Of(flavors.into_iter().collect())
    }

    pub fn supports_flavors(&self) -> bool {
        matches!(self, FlavorDomain::Of(_))
    }

    pub fn contains(&self, flavor: &Flavor) -> bool {
        match self {
            FlavorDomain::Unsupported => false,
            FlavorDomain::Of(flavors) => flavors.contains(flavor),
        }
    }
}

///
/// One registered rule type: its flavor domain and the schema for its non-core attributes.
/// The core attributes (`name`, `type`, `deps`, `srcs`, `visibility`) are handled by the
/// conversion itself.
///
#[derive(Clone, Debug)]
pub struct RuleType {
    name: String,
    flavors: FlavorDomain,
    attrs: Vec<AttrSpec>,
}

impl RuleType {
    pub fn new(name: &str, flavors: FlavorDomain, attrs: Vec<AttrSpec>) -> RuleType {
        RuleType {
            name: name.to_owned(),
            flavors,
            attrs,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flavors(&self) -> &FlavorDomain {
        &self.flavors
    }

    pub fn attr(&self, name: &str) -> Option<&AttrSpec> {
        self.attrs.iter().find(|a| a.name == name)
    }

    pub fn attrs(&self) -> &[AttrSpec] {
        &self.attrs
    }
}

///
/// Supplies rule-type definitions during raw-to-node conversion. An external collaborator: the
/// daemon is handed one at construction and never mutates it.
///
pub trait RuleTypeRegistry: Send + Sync + 'static {
    fn get(&self, rule_type: &str) -> Option<&RuleType>;
}

///
/// A RuleTypeRegistry over a fixed table.
///
pub struct SimpleRuleTypes {
    types: HashMap<String, RuleType>,
}

impl SimpleRuleTypes {
    pub fn new() -> SimpleRuleTypes {
        SimpleRuleTypes {
            types: HashMap::new(),
        }
    }

    pub fn with(mut self, rule_type: RuleType) -> SimpleRuleTypes {
        self.types.insert(rule_type.name().to_owned(), rule_type);
        self
    }
}

impl RuleTypeRegistry for SimpleRuleTypes {
    fn get(&self, rule_type: &str) -> Option<&RuleType> {
        self.types.get(rule_type)
    }
}
