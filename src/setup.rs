use crate::calc::{WeightRules, WeightSet};
use crate::db;
use serde::Serialize;
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupSection {
    Weights,
    Boletin,
}

impl SetupSection {
    pub const ALL: [SetupSection; 2] = [SetupSection::Weights, SetupSection::Boletin];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "weights" => Some(Self::Weights),
            "boletin" => Some(Self::Boletin),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Weights => "weights",
            Self::Boletin => "boletin",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Weights => "setup.weights",
            Self::Boletin => "setup.boletin",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Weights => json!({ "rules": {} }),
        SetupSection::Boletin => json!({
            "schoolName": "Institución Educativa",
            "subtitle": "",
            "shift": "ÚNICA"
        }),
    }
}

/// Printed header shared by every boletín of a workspace.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoletinHeader {
    pub school_name: String,
    pub subtitle: String,
    pub shift: String,
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.chars().count() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn parse_weight(v: &Value, key: &str) -> Result<f64, String> {
    let n = v
        .as_f64()
        .ok_or_else(|| format!("{} must be a number", key))?;
    if !n.is_finite() || !(0.0..=1.0).contains(&n) {
        return Err(format!("{} must be in 0..=1", key));
    }
    Ok(n)
}

fn parse_weight_rule(grade: &str, v: &Value) -> Result<WeightSet, String> {
    let Some(obj) = v.as_object() else {
        return Err(format!("rules.{} must be an object", grade));
    };
    let mut out = [0.0_f64; 3];
    for (i, key) in ["p1", "p2", "p3"].iter().enumerate() {
        let Some(raw) = obj.get(*key) else {
            return Err(format!("rules.{}.{} is required", grade, key));
        };
        out[i] = parse_weight(raw, &format!("rules.{}.{}", grade, key))?;
    }
    if out.iter().sum::<f64>() <= 0.0 {
        return Err(format!("rules.{} weights must not all be zero", grade));
    }
    Ok(WeightSet {
        p1: out[0],
        p2: out[1],
        p3: out[2],
    })
}

pub fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Weights => match k.as_str() {
                "rules" => {
                    let Some(rules) = v.as_object() else {
                        return Err("rules must be an object".into());
                    };
                    let mut normalized = Map::new();
                    for (grade, rule) in rules {
                        let grade_name = grade.trim();
                        if grade_name.is_empty() {
                            return Err("rules keys must be non-empty grade names".into());
                        }
                        let w = parse_weight_rule(grade_name, rule)?;
                        normalized.insert(
                            grade_name.to_string(),
                            json!({ "p1": w.p1, "p2": w.p2, "p3": w.p3 }),
                        );
                    }
                    obj.insert(k.clone(), Value::Object(normalized));
                }
                _ => return Err(format!("unknown weights field: {}", k)),
            },
            SetupSection::Boletin => match k.as_str() {
                "schoolName" => {
                    let s = parse_string_max(v, k, 160)?;
                    if s.is_empty() {
                        return Err("schoolName must not be empty".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                "subtitle" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 200)?));
                }
                "shift" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 40)?));
                }
                _ => return Err(format!("unknown boletin field: {}", k)),
            },
        }
    }
    Ok(())
}

pub fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values must not block report generation.
            if let Err(msg) = merge_section_patch(section, &mut current, saved_obj) {
                tracing::warn!(section = section.name(), %msg, "ignoring saved setup values");
                current = default_section(section);
            }
        }
    }
    Ok(current)
}

pub fn update_section(
    conn: &rusqlite::Connection,
    section: SetupSection,
    patch: &Map<String, Value>,
) -> anyhow::Result<Result<Value, String>> {
    let mut current = load_section(conn, section)?;
    if let Err(msg) = merge_section_patch(section, &mut current, patch) {
        return Ok(Err(msg));
    }
    db::settings_set_json(conn, section.key(), &current)?;
    Ok(Ok(current))
}

pub fn load_weight_rules(conn: &rusqlite::Connection) -> anyhow::Result<WeightRules> {
    let section = load_section(conn, SetupSection::Weights)?;
    let mut rules = WeightRules::new();
    if let Some(obj) = section.get("rules").and_then(|v| v.as_object()) {
        for (grade, rule) in obj {
            // Values were validated on write.
            if let Ok(w) = parse_weight_rule(grade, rule) {
                rules.insert(grade.clone(), w);
            }
        }
    }
    Ok(rules)
}

pub fn load_boletin_header(conn: &rusqlite::Connection) -> anyhow::Result<BoletinHeader> {
    let section = load_section(conn, SetupSection::Boletin)?;
    let field = |key: &str| {
        section
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };
    Ok(BoletinHeader {
        school_name: field("schoolName"),
        subtitle: field("subtitle"),
        shift: field("shift"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::init_schema(&conn).expect("init schema");
        conn
    }

    #[test]
    fn defaults_without_saved_values() {
        let conn = conn();
        assert!(load_weight_rules(&conn).expect("rules").is_empty());
        let header = load_boletin_header(&conn).expect("header");
        assert_eq!(header.shift, "ÚNICA");
    }

    #[test]
    fn weight_rules_roundtrip() {
        let conn = conn();
        let patch = json!({ "rules": { "Primaria": { "p1": 0.2, "p2": 0.3, "p3": 0.5 } } });
        let res = update_section(&conn, SetupSection::Weights, patch.as_object().expect("obj"))
            .expect("db");
        assert!(res.is_ok());
        let rules = load_weight_rules(&conn).expect("rules");
        assert_eq!(rules["Primaria"], WeightSet { p1: 0.2, p2: 0.3, p3: 0.5 });
    }

    #[test]
    fn weight_rules_reject_bad_values() {
        let conn = conn();
        for bad in [
            json!({ "rules": { "Primaria": { "p1": 1.5, "p2": 0.3, "p3": 0.5 } } }),
            json!({ "rules": { "Primaria": { "p1": 0.0, "p2": 0.0, "p3": 0.0 } } }),
            json!({ "rules": { "Primaria": { "p1": 0.5, "p2": 0.5 } } }),
            json!({ "rules": [] }),
            json!({ "other": 1 }),
        ] {
            let res = update_section(&conn, SetupSection::Weights, bad.as_object().expect("obj"))
                .expect("db");
            assert!(res.is_err(), "expected rejection for {}", bad);
        }
        assert!(load_weight_rules(&conn).expect("rules").is_empty());
    }

    #[test]
    fn malformed_saved_section_falls_back_to_defaults() {
        let conn = conn();
        db::settings_set_json(&conn, "setup.boletin", &json!({ "schoolName": 42 }))
            .expect("write raw");
        let header = load_boletin_header(&conn).expect("header");
        assert_eq!(header.school_name, "Institución Educativa");
    }
}
