//! Value validators shared by the importer, processors and request surface
//!
//! Every validator returns [`Error::Validation`] with the message shown to
//! the caller. Callers that report per-field errors add their own prefix.

use crate::models::FieldSchema;
use crate::{Error, Result};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Socket names that would shadow platform routes.
pub const DISALLOWED_NAMES: &[&str] = &["install"];

/// Suffixes reserved for endpoint sub-resources.
pub const DISALLOWED_SUFFIXES: &[&str] = &["history", "traces"];

pub const MAX_NAME_LENGTH: usize = 64;

const SOCKETS_MAPPING_MAX: usize = 20;

/// Lazily compiled regex. A pattern that fails to build is returned as an error.
macro_rules! static_regex {
    ($vis:vis $name:ident, $pattern:expr) => {
        $vis fn $name() -> $crate::Result<&'static ::regex::Regex> {
            static RE: ::std::sync::OnceLock<::std::result::Result<::regex::Regex, ::regex::Error>> =
                ::std::sync::OnceLock::new();
            RE.get_or_init(|| ::regex::Regex::new($pattern))
                .as_ref()
                .map_err(|e| $crate::Error::Regex(e.clone()))
        }
    };
}
pub(crate) use static_regex;

static_regex!(
    path_regex,
    r"(?i)^(?:[a-z0-9\-._~!*'():@&+$,]|%[0-9a-f]{2})+(?:/(?:[a-z0-9\-._~!*'():@&+$,]|%[0-9a-f]{2})+)*$"
);
static_regex!(channel_regex, r"(?i)^(?:(?:\{[a-z.\-_0-9]+\})?[a-z.\-_0-9]*)+$");
static_regex!(label_regex, r"^[a-z\d\-]{0,62}[a-z\d]$");
static_regex!(tld_regex, r"^[a-z\d]{1,63}$");
static_regex!(prefix_regex, r"^[a-z0-9-]+$");
static_regex!(slug_regex, r"^[a-z0-9_-]+$");
static_regex!(mapping_target_regex, r"^[a-z0-9_-]+/[a-z0-9_-]+");
static_regex!(field_name_regex, r"(?i)^[a-z][a-z0-9_]*$");

fn invalid(message: impl Into<String>) -> Error {
    Error::validation(message, None)
}

// ============================================================================
// Paths, channels, names
// ============================================================================

/// Relative file path made of URL-safe segments, no leading or trailing slash.
pub fn is_valid_path(path: &str) -> Result<bool> {
    Ok(path_regex()?.is_match(path))
}

pub fn is_valid_channel(channel: &str) -> Result<bool> {
    Ok((1..=64).contains(&channel.len()) && channel_regex()?.is_match(channel))
}

/// Socket names are lower-case slugs.
pub fn validate_socket_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(invalid("Socket name is required."));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(invalid(format!(
            "Ensure socket name has no more than {} characters.",
            MAX_NAME_LENGTH
        )));
    }
    if !slug_regex()?.is_match(name) {
        return Err(invalid(
            "Enter a valid socket name consisting of lower-case letters, numbers, underscores or hyphens.",
        ));
    }
    if DISALLOWED_NAMES.contains(&name) {
        return Err(invalid("Unable to use that value. Please choose a different one."));
    }
    Ok(())
}

/// Full endpoint name (`<socket>/<endpoint>`).
pub fn validate_endpoint_name(name: &str) -> Result<()> {
    if DISALLOWED_NAMES.contains(&name) {
        return Err(invalid("Unable to use that value. Please choose a different one."));
    }

    let mut suffixes = DISALLOWED_SUFFIXES.to_vec();
    suffixes.sort_unstable();
    if suffixes.iter().any(|s| name.ends_with(&format!("/{}", s))) {
        return Err(invalid(format!("Value cannot end with {}.", suffixes.join(", "))));
    }
    Ok(())
}

/// Explicit partial-update file list.
pub fn validate_file_list(files: &[String], max_files: usize) -> Result<()> {
    if files.len() > max_files {
        return Err(invalid(format!("Too many files defined (exceeds {}).", max_files)));
    }
    Ok(())
}

// ============================================================================
// Socket config
// ============================================================================

/// Check tenant overrides against the variables a manifest declares in `config`.
pub fn validate_socket_config(overrides: &Map<String, Value>, declared: Option<&Value>) -> Result<()> {
    let declared = match declared {
        None | Some(Value::Null) => return Ok(()),
        Some(Value::Object(map)) => map,
        Some(_) => return Err(Error::Config("Wrong format.".to_string())),
    };

    for (name, meta) in declared {
        let meta = meta
            .as_object()
            .ok_or_else(|| Error::Config("Wrong format.".to_string()))?;
        let required = meta.get("required").map(truthy).unwrap_or(false);
        if required && !overrides.contains_key(name) {
            return Err(Error::Config(format!("\"{}\" is required.", name)));
        }
    }
    Ok(())
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

// ============================================================================
// Hosting
// ============================================================================

/// Two to 127 dot separated labels. The last label is alphanumeric and does
/// not start with a digit.
fn is_valid_domain(value: &str) -> Result<bool> {
    if value.starts_with('-') {
        return Ok(false);
    }
    let labels: Vec<&str> = value.split('.').collect();
    let Some((tld, rest)) = labels.split_last() else {
        return Ok(false);
    };
    if rest.is_empty() || rest.len() > 126 {
        return Ok(false);
    }
    if !tld_regex()?.is_match(tld) || tld.starts_with(|c: char| c.is_ascii_digit()) {
        return Ok(false);
    }
    let label = label_regex()?;
    Ok(rest.iter().all(|l| label.is_match(l)))
}

fn check_domain(value: &str, hosting_domain: &str, message: &str) -> Result<()> {
    let shaped = prefix_regex()?.is_match(value) || is_valid_domain(value)?;
    if !shaped || value.ends_with(hosting_domain) {
        return Err(invalid(message));
    }
    Ok(())
}

/// A custom domain attached to a hosting site.
pub fn validate_domain(value: &str, hosting_domain: &str) -> Result<()> {
    check_domain(value, hosting_domain, "Invalid domain specified.")
}

/// Hosting site name, used as the platform subdomain prefix.
pub fn validate_hosting_name(value: &str, hosting_domain: &str) -> Result<()> {
    check_domain(value, hosting_domain, "Invalid name specified.")
}

pub fn validate_hosting_config(config: &Value) -> Result<()> {
    let config = match config {
        Value::Null => return Ok(()),
        Value::Object(map) => map,
        _ => return Err(invalid("Invalid config specified.")),
    };

    if config
        .keys()
        .any(|k| k != "browser_router" && k != "sockets_mapping")
    {
        return Err(invalid(
            "Invalid config. Possible keys: browser_router, sockets_mapping.",
        ));
    }

    if let Some(value) = config.get("browser_router") {
        if !value.is_boolean() {
            return Err(invalid(
                "Invalid config value type for \"browser_router\". Expected a bool.",
            ));
        }
    }

    if let Some(value) = config.get("sockets_mapping") {
        let mappings = value.as_array().ok_or_else(|| {
            invalid("Invalid config value type for \"sockets_mapping\". Expected a list.")
        })?;
        validate_sockets_mapping(mappings)?;
    }
    Ok(())
}

fn validate_sockets_mapping(mappings: &[Value]) -> Result<()> {
    if mappings.len() > SOCKETS_MAPPING_MAX {
        return Err(invalid(format!(
            "Too many sockets mapping specified (exceeds {}).",
            SOCKETS_MAPPING_MAX
        )));
    }

    for (idx, mapping) in mappings.iter().enumerate() {
        let pair: Vec<&str> = mapping
            .as_array()
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        if pair.len() != 2 || mapping.as_array().map(Vec::len) != Some(2) {
            return Err(invalid(format!("Invalid socket mapping at #{}.", idx)));
        }
        if !pair[0].starts_with('*') && !pair[0].starts_with('/') {
            return Err(invalid(format!(
                "Invalid socket mapping at #{}. Should start with \"*\" or \"/\".",
                idx
            )));
        }
        if !mapping_target_regex()?.is_match(pair[1]) {
            return Err(invalid(format!(
                "Invalid socket mapping at #{}. Endpoint should be in form \"<socket>/<endpoint>\".",
                idx
            )));
        }
    }
    Ok(())
}

// ============================================================================
// Class schema
// ============================================================================

pub const MAX_FIELDS: usize = 32;
pub const MAX_INDEXES: usize = 16;

const FIELD_TYPES: &[&str] = &[
    "string", "text", "integer", "float", "boolean", "datetime", "file", "reference", "object",
    "array", "geopoint", "relation",
];
const NOINDEX_TYPES: &[&str] = &["text", "file", "object"];

/// Names taken by data object attributes.
const RESERVED_FIELD_NAMES: &[&str] = &[
    "expected_revision",
    "links",
    "self",
    "id",
    "pk",
    "created_at",
    "updated_at",
    "revision",
    "owner",
    "owner_id",
    "owner_permissions",
    "group",
    "group_id",
    "group_permissions",
    "other_permissions",
    "channel",
    "channel_id",
    "channel_room",
    "acl",
    "objects",
    "save",
    "delete",
];

fn possible_keys(field_type: &str) -> &'static [&'static str] {
    match field_type {
        "reference" => &["name", "type", "order_index", "filter_index", "target", "unique"],
        "array" | "geopoint" => &["name", "type", "filter_index"],
        "relation" => &["name", "type", "filter_index", "target"],
        t if NOINDEX_TYPES.contains(&t) => &["name", "type"],
        _ => &["name", "type", "order_index", "filter_index", "unique"],
    }
}

/// Validates a class schema and normalizes it into typed fields.
///
/// `ignored_targets` are classes declared alongside this one in the same
/// install, which may not exist yet.
pub struct SchemaValidator<'a> {
    pub old_schema: &'a [FieldSchema],
    pub ignored_targets: &'a [String],
    pub class_exists: &'a dyn Fn(&str) -> bool,
}

impl<'a> SchemaValidator<'a> {
    pub fn validate(&self, schema: &Value) -> Result<Vec<FieldSchema>> {
        let fields = schema
            .as_array()
            .ok_or_else(|| invalid("Schema passed in invalid format."))?;
        if fields.len() > MAX_FIELDS {
            return Err(invalid(format!("Too many fields defined (exceeds {}).", MAX_FIELDS)));
        }

        let mut names = HashSet::new();
        let mut index_count: HashMap<&str, usize> = HashMap::new();
        let mut result = Vec::with_capacity(fields.len());

        for (idx, field) in fields.iter().enumerate() {
            let field = field
                .as_object()
                .ok_or_else(|| invalid("Schema passed in invalid format."))?;

            let parsed = self
                .validate_field(field, &mut names, &mut index_count)
                .map_err(|message| {
                    let name = field.get("name").and_then(Value::as_str).unwrap_or("unknown");
                    invalid(format!(
                        "Error processing field definition \"{}\" #{}: {}",
                        name, idx, message
                    ))
                })?;
            result.push(parsed);
        }

        Ok(result)
    }

    fn validate_field(
        &self,
        field: &Map<String, Value>,
        names: &mut HashSet<String>,
        index_count: &mut HashMap<&'static str, usize>,
    ) -> std::result::Result<FieldSchema, String> {
        let (name, type_value) = match (field.get("name"), field.get("type")) {
            (Some(name), Some(field_type)) => (name, field_type),
            _ => return Err("Field name and type is required.".to_string()),
        };

        let name = name
            .as_str()
            .ok_or("Invalid type of field name. Expected string.")?;
        if name.is_empty() {
            return Err("Value of field name is too short, minimum length is 1.".to_string());
        }
        if name.len() > 64 {
            return Err("Value of field name is too long, maximum length is 64.".to_string());
        }
        if !field_name_regex().map_err(|e| e.to_string())?.is_match(name) {
            return Err(format!(
                "Wrong characters used in field name \"{}\". Allowed characters are: letters, numbers and underscores. Name has to start with a letter.",
                name
            ));
        }
        if RESERVED_FIELD_NAMES.contains(&name.to_lowercase().as_str()) {
            return Err(format!("Field name \"{}\" is reserved.", name));
        }

        let field_type = type_value
            .as_str()
            .ok_or("Invalid type of field type. Expected string.")?
            .to_lowercase();
        let field_type = match FIELD_TYPES.iter().find(|t| **t == field_type) {
            Some(t) => *t,
            None => {
                return Err(format!(
                    "Invalid field type value. Possible types: {}.",
                    FIELD_TYPES.join(", ")
                ))
            }
        };

        let allowed = possible_keys(field_type);
        if field.keys().any(|k| !allowed.contains(&k.as_str())) {
            return Err(format!(
                "Field {} definition can only consist of {}.",
                field_type,
                allowed.join(", ")
            ));
        }

        if !names.insert(name.to_string()) {
            return Err(format!("Field \"{}\" defined more than once.", name));
        }

        let mut props = BTreeMap::new();
        if !NOINDEX_TYPES.contains(&field_type) {
            props = self.validate_indexes(field, name, field_type, index_count)?;
        }

        let mut target = None;
        if field_type == "reference" || field_type == "relation" {
            target = Some(self.validate_target(field.get("target"))?);
        }

        Ok(FieldSchema {
            name: name.to_string(),
            field_type: field_type.to_string(),
            target,
            props,
        })
    }

    fn validate_indexes(
        &self,
        field: &Map<String, Value>,
        name: &str,
        field_type: &'static str,
        index_count: &mut HashMap<&'static str, usize>,
    ) -> std::result::Result<BTreeMap<String, bool>, String> {
        let mut props = BTreeMap::new();
        let flag = |key: &str, label: &str| -> std::result::Result<bool, String> {
            match field.get(key) {
                None => Ok(false),
                Some(Value::Bool(b)) => Ok(*b),
                Some(_) => Err(format!("Invalid type of field \"{}\". Expected boolean.", label)),
            }
        };

        let unique = match field.get("unique") {
            None => false,
            Some(Value::Bool(b)) => *b,
            Some(_) => return Err("Invalid type of field \"unique\". Expected boolean.".to_string()),
        };
        let mut filter_index = flag("filter_index", "filter index")?;
        let order_index = flag("order_index", "order index")?;

        if unique {
            let existing = self.old_schema.iter().find(|f| f.name == name);
            if let Some(old) = existing {
                if old.field_type == field_type && !old.props.get("unique").copied().unwrap_or(false) {
                    return Err("Unique index can only be set on a new field. Delete field first.".to_string());
                }
            }
            filter_index = true;
            props.insert("unique".to_string(), true);
        }

        for (enabled, key) in [(order_index, "order_index"), (filter_index, "filter_index")] {
            if enabled {
                *index_count.entry(key).or_default() += 1;
                *index_count.entry(field_type).or_default() += 1;
                props.insert(key.to_string(), true);
            }
        }

        let total = index_count.get("order_index").copied().unwrap_or(0)
            + index_count.get("filter_index").copied().unwrap_or(0);
        if total > MAX_INDEXES {
            return Err(format!("Too many indexes defined (exceeds {}).", MAX_INDEXES));
        }
        if index_count.get("geopoint").copied().unwrap_or(0) > 1 {
            return Err("Too many indexes defined on field type geopoint (exceeds 1).".to_string());
        }

        Ok(props)
    }

    fn validate_target(&self, target: Option<&Value>) -> std::result::Result<String, String> {
        let target = match target {
            None | Some(Value::Null) => {
                return Err("Target must specify class name or \"self\".".to_string())
            }
            Some(Value::String(s)) if !s.is_empty() => s.to_lowercase(),
            Some(_) => return Err("Invalid value of target. Expected non-empty string.".to_string()),
        };

        if target == "users" {
            return Err("Target cannot be set to \"users\". Use \"user\" instead.".to_string());
        }
        let known = target == "self"
            || target == "user"
            || self.ignored_targets.iter().any(|t| *t == target)
            || (self.class_exists)(&target);
        if !known {
            return Err("Class specified by target is missing.".to_string());
        }
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validate(schema: Value) -> Result<Vec<FieldSchema>> {
        let exists = |name: &str| name == "book";
        SchemaValidator {
            old_schema: &[],
            ignored_targets: &["author".to_string()],
            class_exists: &exists,
        }
        .validate(&schema)
    }

    fn message(schema: Value) -> String {
        validate(schema).unwrap_err().to_string()
    }

    // ========================================================================
    // Paths and names
    // ========================================================================

    #[test]
    fn test_paths() {
        assert!(is_valid_path("scripts/hello.js").unwrap());
        assert!(is_valid_path("a%20b/c~d.js").unwrap());
        assert!(!is_valid_path("/abs.js").unwrap());
        assert!(!is_valid_path("dir/").unwrap());
        assert!(!is_valid_path("a//b").unwrap());
        assert!(!is_valid_path("with space.js").unwrap());
    }

    #[test]
    fn test_channels() {
        assert!(is_valid_channel("room.{user}").unwrap());
        assert!(is_valid_channel("Global_Chat-1").unwrap());
        assert!(!is_valid_channel("").unwrap());
        assert!(!is_valid_channel("room #1").unwrap());
        assert!(!is_valid_channel(&"a".repeat(65)).unwrap());
    }

    #[test]
    fn test_socket_names() {
        assert!(validate_socket_name("my-socket_1").is_ok());
        assert!(validate_socket_name("install").is_err());
        assert!(validate_socket_name("Upper").is_err());
        assert!(validate_socket_name(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_endpoint_names() {
        assert!(validate_endpoint_name("demo/hello").is_ok());
        assert_eq!(
            validate_endpoint_name("demo/history").unwrap_err().to_string(),
            "Value cannot end with history, traces."
        );
        assert!(validate_endpoint_name("demo/traces").is_err());
    }

    #[test]
    fn test_file_list_limit() {
        let files: Vec<String> = (0..31).map(|i| format!("{}.js", i)).collect();
        assert_eq!(
            validate_file_list(&files, 30).unwrap_err().to_string(),
            "Too many files defined (exceeds 30)."
        );
        assert!(validate_file_list(&files[..30], 30).is_ok());
    }

    // ========================================================================
    // Socket config
    // ========================================================================

    #[test]
    fn test_config_required_variable() {
        let declared = json!({"API_KEY": {"required": true}, "DEBUG": {}});
        let mut overrides = Map::new();
        assert_eq!(
            validate_socket_config(&overrides, Some(&declared)).unwrap_err().to_string(),
            "Error validating socket config. \"API_KEY\" is required."
        );

        overrides.insert("API_KEY".into(), json!("secret"));
        assert!(validate_socket_config(&overrides, Some(&declared)).is_ok());
        assert!(validate_socket_config(&overrides, None).is_ok());
    }

    #[test]
    fn test_config_wrong_format() {
        let overrides = Map::new();
        for declared in [json!(["a"]), json!({"a": "b"})] {
            assert_eq!(
                validate_socket_config(&overrides, Some(&declared)).unwrap_err().to_string(),
                "Error validating socket config. Wrong format."
            );
        }
    }

    // ========================================================================
    // Hosting
    // ========================================================================

    #[test]
    fn test_domains() {
        let platform = ".socketpm.site";
        assert!(validate_domain("my.example.com", platform).is_ok());
        assert!(validate_domain("staging", platform).is_ok());
        assert!(validate_domain("-bad.example.com", platform).is_err());
        assert!(validate_domain("example.123", platform).is_err());
        assert!(validate_domain("foo.socketpm.site", platform).is_err());
        assert!(validate_domain("www.example.com", platform).is_ok());
        assert!(validate_domain("x.-b.example.io", platform).is_ok());
        assert!(validate_domain("bad..example.com", platform).is_err());
        assert!(validate_domain("example.c-m", platform).is_err());

        let deep = format!("{}com", "a.".repeat(126));
        assert!(validate_domain(&deep, platform).is_ok());
        let too_deep = format!("{}com", "a.".repeat(127));
        assert!(validate_domain(&too_deep, platform).is_err());
        let long_label = format!("{}.com", "a".repeat(64));
        assert!(validate_domain(&long_label, platform).is_err());
        assert_eq!(
            validate_hosting_name("Bad_Name", platform).unwrap_err().to_string(),
            "Invalid name specified."
        );
    }

    #[test]
    fn test_hosting_config() {
        assert!(validate_hosting_config(&json!({"browser_router": true})).is_ok());
        assert!(validate_hosting_config(&json!({"sockets_mapping": [["/api", "demo/hello"]]})).is_ok());
        assert_eq!(
            validate_hosting_config(&json!("x")).unwrap_err().to_string(),
            "Invalid config specified."
        );
        assert_eq!(
            validate_hosting_config(&json!({"sockets_mapping": [["api", "demo/hello"]]}))
                .unwrap_err()
                .to_string(),
            "Invalid socket mapping at #0. Should start with \"*\" or \"/\"."
        );
        assert_eq!(
            validate_hosting_config(&json!({"sockets_mapping": [["/", "x"], ["*"]]}))
                .unwrap_err()
                .to_string(),
            "Invalid socket mapping at #0. Endpoint should be in form \"<socket>/<endpoint>\"."
        );
        assert!(validate_hosting_config(&json!({"other": 1})).is_err());
    }

    // ========================================================================
    // Schema
    // ========================================================================

    #[test]
    fn test_schema_normalizes_fields() {
        let fields = validate(json!([
            {"name": "title", "type": "String", "filter_index": true},
            {"name": "isbn", "type": "string", "unique": true},
            {"name": "author", "type": "reference", "target": "Author", "order_index": false},
            {"name": "body", "type": "text"}
        ]))
        .unwrap();

        assert_eq!(fields[0].field_type, "string");
        assert_eq!(fields[0].enabled_props(), vec!["filter_index"]);
        assert_eq!(fields[1].enabled_props(), vec!["filter_index", "unique"]);
        assert_eq!(fields[2].target.as_deref(), Some("author"));
        assert!(fields[2].props.is_empty());
        assert!(fields[3].props.is_empty());
    }

    #[test]
    fn test_schema_errors() {
        assert_eq!(message(json!({"a": 1})), "Schema passed in invalid format.");
        assert_eq!(
            message(json!([{"name": "a"}])),
            "Error processing field definition \"a\" #0: Field name and type is required."
        );
        assert_eq!(
            message(json!([{"type": "string"}])),
            "Error processing field definition \"unknown\" #0: Field name and type is required."
        );
        assert!(message(json!([{"name": "1a", "type": "string"}])).contains("Wrong characters used"));
        assert!(message(json!([{"name": "id", "type": "string"}])).ends_with("Field name \"id\" is reserved."));
        assert!(message(json!([{"name": "a", "type": "blob"}])).contains("Invalid field type value."));
        assert!(message(json!([{"name": "a", "type": "text", "filter_index": true}]))
            .ends_with("Field text definition can only consist of name, type."));
        assert!(message(json!([{"name": "a", "type": "string"}, {"name": "a", "type": "integer"}]))
            .ends_with("Field \"a\" defined more than once."));
        assert!(message(json!([{"name": "a", "type": "string", "filter_index": "yes"}]))
            .ends_with("Invalid type of field \"filter index\". Expected boolean."));
    }

    #[test]
    fn test_schema_targets() {
        assert!(message(json!([{"name": "r", "type": "reference"}]))
            .ends_with("Target must specify class name or \"self\"."));
        assert!(message(json!([{"name": "r", "type": "relation", "target": ""}]))
            .ends_with("Invalid value of target. Expected non-empty string."));
        assert!(message(json!([{"name": "r", "type": "reference", "target": "users"}]))
            .ends_with("Target cannot be set to \"users\". Use \"user\" instead."));
        assert!(message(json!([{"name": "r", "type": "reference", "target": "ghost"}]))
            .ends_with("Class specified by target is missing."));
        assert!(validate(json!([{"name": "r", "type": "reference", "target": "book"}])).is_ok());
        assert!(validate(json!([{"name": "r", "type": "relation", "target": "self"}])).is_ok());
    }

    #[test]
    fn test_schema_index_limits() {
        let many: Vec<Value> = (0..17)
            .map(|i| json!({"name": format!("f{}", i), "type": "integer", "filter_index": true}))
            .collect();
        assert!(message(Value::Array(many)).ends_with("Too many indexes defined (exceeds 16)."));

        assert!(message(json!([
            {"name": "a", "type": "geopoint", "filter_index": true},
            {"name": "b", "type": "geopoint", "filter_index": true}
        ]))
        .ends_with("Too many indexes defined on field type geopoint (exceeds 1)."));

        let too_many: Vec<Value> = (0..33).map(|i| json!({"name": format!("f{}", i), "type": "integer"})).collect();
        assert_eq!(message(Value::Array(too_many)), "Too many fields defined (exceeds 32).");
    }

    #[test]
    fn test_unique_only_on_new_field() {
        let old = vec![FieldSchema {
            name: "isbn".into(),
            field_type: "string".into(),
            target: None,
            props: BTreeMap::new(),
        }];
        let exists = |_: &str| false;
        let validator = SchemaValidator {
            old_schema: &old,
            ignored_targets: &[],
            class_exists: &exists,
        };
        let err = validator
            .validate(&json!([{"name": "isbn", "type": "string", "unique": true}]))
            .unwrap_err();
        assert!(err.to_string().ends_with("Unique index can only be set on a new field. Delete field first."));
    }
}
