//! Naming conversion between record space and wire space.
//!
//! Record space uses camel case (`lastName`), the wire uses underscores
//! (`last_name`). Type names are underscored singulars (`person_type`) and are
//! pluralized for URLs and collection roots.

use convert_case::{Case, Casing};
use indexmap::IndexMap;

/// Converts `last_name` to `lastName`.
pub fn camelize(word: &str) -> String {
    word.to_case(Case::Camel)
}

/// Converts `lastName` to `last_name`.
pub fn underscore(word: &str) -> String {
    word.to_case(Case::Snake)
}

/// Pluralization with a per-word override table.
///
/// Overrides win in both directions, so configuring `person -> people` also
/// makes `singularize("people")` return `person`.
#[derive(Debug, Clone, Default)]
pub struct Inflector {
    plurals: IndexMap<String, String>,
    singulars: IndexMap<String, String>,
}

impl Inflector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an inflector from a singular -> plural override table.
    pub fn with_overrides<'a>(overrides: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        let mut inflector = Self::new();
        for (singular, plural) in overrides {
            inflector.irregular(singular, plural);
        }
        inflector
    }

    /// Registers an irregular pair.
    pub fn irregular(&mut self, singular: &str, plural: &str) {
        self.plurals.insert(singular.to_string(), plural.to_string());
        self.singulars.insert(plural.to_string(), singular.to_string());
    }

    pub fn pluralize(&self, word: &str) -> String {
        if let Some(plural) = self.plurals.get(word) {
            return plural.clone();
        }
        let (prefix, last) = split_last_segment(word);
        if let Some(plural) = self.plurals.get(last) {
            return format!("{prefix}{plural}");
        }
        format!("{prefix}{}", default_pluralize(last))
    }

    pub fn singularize(&self, word: &str) -> String {
        if let Some(singular) = self.singulars.get(word) {
            return singular.clone();
        }
        let (prefix, last) = split_last_segment(word);
        if let Some(singular) = self.singulars.get(last) {
            return format!("{prefix}{singular}");
        }
        format!("{prefix}{}", default_singularize(last))
    }
}

/// Splits `person_type` into (`person_`, `type`) so only the last word inflects.
fn split_last_segment(word: &str) -> (&str, &str) {
    match word.rfind('_') {
        Some(idx) => (&word[..=idx], &word[idx + 1..]),
        None => ("", word),
    }
}

fn is_vowel(ch: char) -> bool {
    matches!(ch, 'a' | 'e' | 'i' | 'o' | 'u')
}

fn default_pluralize(word: &str) -> String {
    if word.is_empty() {
        return String::new();
    }
    if let Some(stem) = word.strip_suffix('y') {
        if stem.chars().last().is_some_and(|c| !is_vowel(c)) {
            return format!("{stem}ies");
        }
    }
    if ["s", "x", "z", "ch", "sh"].iter().any(|s| word.ends_with(s)) {
        return format!("{word}es");
    }
    format!("{word}s")
}

fn default_singularize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        return format!("{stem}y");
    }
    for suffix in ["sses", "xes", "zes", "ches", "shes"] {
        if word.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }
    if word.ends_with("ss") {
        return word.to_string();
    }
    match word.strip_suffix('s') {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => word.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camelize_and_underscore() {
        assert_eq!(camelize("last_name"), "lastName");
        assert_eq!(camelize("person_type_id"), "personTypeId");
        assert_eq!(camelize("name"), "name");
        assert_eq!(underscore("lastName"), "last_name");
        assert_eq!(underscore("personType"), "person_type");
        assert_eq!(underscore("updatedAt"), "updated_at");
        assert_eq!(underscore("name"), "name");
        assert_eq!(underscore("PersonType"), "person_type");
    }

    #[test]
    fn default_rules() {
        let inflector = Inflector::new();
        assert_eq!(inflector.pluralize("group"), "groups");
        assert_eq!(inflector.pluralize("category"), "categories");
        assert_eq!(inflector.pluralize("day"), "days");
        assert_eq!(inflector.pluralize("box"), "boxes");
        assert_eq!(inflector.pluralize("match"), "matches");
        assert_eq!(inflector.singularize("groups"), "group");
        assert_eq!(inflector.singularize("categories"), "category");
        assert_eq!(inflector.singularize("boxes"), "box");
        assert_eq!(inflector.singularize("addresses"), "address");
    }

    #[test]
    fn overrides_apply_both_ways() {
        let mut inflector = Inflector::new();
        inflector.irregular("person", "people");
        assert_eq!(inflector.pluralize("person"), "people");
        assert_eq!(inflector.singularize("people"), "person");
        assert_eq!(inflector.pluralize("sales_person"), "sales_people");
    }

    #[test]
    fn only_last_segment_inflects() {
        let inflector = Inflector::new();
        assert_eq!(inflector.pluralize("person_type"), "person_types");
        assert_eq!(inflector.singularize("person_types"), "person_type");
    }
}
