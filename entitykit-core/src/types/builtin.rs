//! Built-in value types (spec §4.2).

use super::{TypeError, ValueType};
use serde_json::{Map, Value as RawValue};
use std::sync::Arc;

/// Hashing capability the `password` type delegates to. Kept abstract so the
/// engine never needs to know about a concrete hashing algorithm — the
/// surrounding application supplies one, the way `crudkit_rs` leaves
/// authentication concerns to an `AuthExtractor` implementor.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, raw: &str) -> String;
}

/// A hasher that performs no hashing. Only useful in tests; never wire this
/// into a real `TypeRegistry`.
pub struct NoopPasswordHasher;

impl PasswordHasher for NoopPasswordHasher {
    fn hash(&self, raw: &str) -> String {
        raw.to_string()
    }
}

fn raw_to_string(raw: &RawValue) -> Option<String> {
    match raw {
        RawValue::String(s) => Some(s.clone()),
        RawValue::Number(n) => Some(n.to_string()),
        RawValue::Bool(b) => Some(b.to_string()),
        RawValue::Null => Some(String::new()),
        _ => None,
    }
}

fn raw_to_f64(raw: &RawValue) -> Option<f64> {
    match raw {
        RawValue::Number(n) => n.as_f64(),
        RawValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn round_half_up(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn number_value(n: f64) -> Result<RawValue, TypeError> {
    serde_json::Number::from_f64(n)
        .map(RawValue::Number)
        .ok_or_else(|| TypeError::new("number", "value is not finite"))
}

macro_rules! string_identity_type {
    ($struct_name:ident, $name:literal, trim = $trim:expr) => {
        pub struct $struct_name;
        impl ValueType for $struct_name {
            fn name(&self) -> &str {
                $name
            }
            fn convert(&self, raw: &RawValue) -> Result<RawValue, TypeError> {
                let s = raw_to_string(raw)
                    .ok_or_else(|| TypeError::new($name, "cannot be coerced to a string"))?;
                let s = if $trim { s.trim().to_string() } else { s };
                Ok(RawValue::String(s))
            }
        }
    };
}

pub struct ObjType;
impl ValueType for ObjType {
    fn name(&self) -> &str {
        "obj"
    }
    fn convert(&self, raw: &RawValue) -> Result<RawValue, TypeError> {
        Ok(raw.clone())
    }
}

string_identity_type!(StringType, "string", trim = true);
string_identity_type!(LstrType, "lstr", trim = false);
string_identity_type!(TextType, "text", trim = false);
string_identity_type!(DateType, "date", trim = false);
string_identity_type!(EnumType, "enum", trim = false);
string_identity_type!(LogCategoryType, "log_category", trim = false);

pub struct BooleanType;
impl ValueType for BooleanType {
    fn name(&self) -> &str {
        "boolean"
    }
    fn convert(&self, raw: &RawValue) -> Result<RawValue, TypeError> {
        match raw {
            RawValue::Bool(b) => Ok(RawValue::Bool(*b)),
            RawValue::String(s) if s == "true" => Ok(RawValue::Bool(true)),
            RawValue::String(s) if s == "false" => Ok(RawValue::Bool(false)),
            _ => Err(TypeError::new("boolean", "expected true, false, \"true\" or \"false\"")),
        }
    }
}

fn to_integer(raw: &RawValue, type_name: &str) -> Result<i64, TypeError> {
    match raw {
        RawValue::Number(n) => n
            .as_i64()
            .ok_or_else(|| TypeError::new(type_name, "expected an integer, got a fractional number")),
        RawValue::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| TypeError::new(type_name, "not an integer-formatted string")),
        _ => Err(TypeError::new(type_name, "cannot be coerced to an integer")),
    }
}

pub struct IntType;
impl ValueType for IntType {
    fn name(&self) -> &str {
        "int"
    }
    fn convert(&self, raw: &RawValue) -> Result<RawValue, TypeError> {
        Ok(RawValue::from(to_integer(raw, "int")?))
    }
}

pub struct UintType;
impl ValueType for UintType {
    fn name(&self) -> &str {
        "uint"
    }
    fn convert(&self, raw: &RawValue) -> Result<RawValue, TypeError> {
        let v = to_integer(raw, "uint")?;
        if v < 0 {
            return Err(TypeError::new("uint", "must be >= 0"));
        }
        Ok(RawValue::from(v))
    }
}

pub struct NumberType;
impl ValueType for NumberType {
    fn name(&self) -> &str {
        "number"
    }
    fn convert(&self, raw: &RawValue) -> Result<RawValue, TypeError> {
        let v = raw_to_f64(raw).ok_or_else(|| TypeError::new("number", "not a finite number"))?;
        if !v.is_finite() {
            return Err(TypeError::new("number", "not a finite number"));
        }
        number_value(v)
    }
}

macro_rules! rounded_float_type {
    ($struct_name:ident, $name:literal) => {
        pub struct $struct_name;
        impl ValueType for $struct_name {
            fn name(&self) -> &str {
                $name
            }
            fn convert(&self, raw: &RawValue) -> Result<RawValue, TypeError> {
                let v = raw_to_f64(raw).ok_or_else(|| TypeError::new($name, "not a number"))?;
                number_value(round_half_up(v, 2))
            }
        }
    };
}

rounded_float_type!(FloatType, "float");
rounded_float_type!(PercentageType, "percentage");

pub struct UfloatType;
impl ValueType for UfloatType {
    fn name(&self) -> &str {
        "ufloat"
    }
    fn convert(&self, raw: &RawValue) -> Result<RawValue, TypeError> {
        let v = raw_to_f64(raw).ok_or_else(|| TypeError::new("ufloat", "not a number"))?;
        if v < 0.0 {
            return Err(TypeError::new("ufloat", "must be >= 0"));
        }
        number_value(round_half_up(v, 2))
    }
}

macro_rules! unrounded_float_type {
    ($struct_name:ident, $name:literal) => {
        pub struct $struct_name;
        impl ValueType for $struct_name {
            fn name(&self) -> &str {
                $name
            }
            fn convert(&self, raw: &RawValue) -> Result<RawValue, TypeError> {
                let v = raw_to_f64(raw).ok_or_else(|| TypeError::new($name, "not a finite number"))?;
                if !v.is_finite() {
                    return Err(TypeError::new($name, "not a finite number"));
                }
                number_value(v)
            }
        }
    };
}

unrounded_float_type!(DecimalType, "decimal");
unrounded_float_type!(CurrencyType, "currency");

pub struct DatetimeType;
impl ValueType for DatetimeType {
    fn name(&self) -> &str {
        "datetime"
    }
    fn convert(&self, raw: &RawValue) -> Result<RawValue, TypeError> {
        use time::format_description::well_known::Rfc3339;
        let s = raw_to_string(raw).ok_or_else(|| TypeError::new("datetime", "not a string"))?;
        let parsed = time::OffsetDateTime::parse(&s, &Rfc3339)
            .or_else(|_| time::OffsetDateTime::parse(&format!("{s}T00:00:00Z"), &Rfc3339))
            .map_err(|_| TypeError::new("datetime", "not parseable as an instant"))?;
        let formatted = parsed
            .format(&Rfc3339)
            .map_err(|_| TypeError::new("datetime", "could not format as ISO-8601"))?;
        Ok(RawValue::String(formatted))
    }
}

fn regex_type(name: &'static str, pattern: &'static str, message: &'static str) -> RegexType {
    RegexType {
        name,
        pattern: regex::Regex::new(pattern).expect("built-in regex is valid"),
        message,
    }
}

pub struct RegexType {
    name: &'static str,
    pattern: regex::Regex,
    message: &'static str,
}

impl ValueType for RegexType {
    fn name(&self) -> &str {
        self.name
    }
    fn convert(&self, raw: &RawValue) -> Result<RawValue, TypeError> {
        let s = raw_to_string(raw).ok_or_else(|| TypeError::new(self.name, self.message))?;
        if self.pattern.is_match(&s) {
            Ok(RawValue::String(s))
        } else {
            Err(TypeError::new(self.name, self.message))
        }
    }
}

pub struct UuidType;
impl ValueType for UuidType {
    fn name(&self) -> &str {
        "uuid"
    }
    fn convert(&self, raw: &RawValue) -> Result<RawValue, TypeError> {
        let s = raw_to_string(raw).ok_or_else(|| TypeError::new("uuid", "not a string"))?;
        uuid::Uuid::parse_str(s.trim())
            .map(|u| RawValue::String(u.to_string()))
            .map_err(|_| TypeError::new("uuid", "not a valid UUID"))
    }
}

pub struct IpAddressType;
impl ValueType for IpAddressType {
    fn name(&self) -> &str {
        "ip_address"
    }
    fn convert(&self, raw: &RawValue) -> Result<RawValue, TypeError> {
        let s = raw_to_string(raw).ok_or_else(|| TypeError::new("ip_address", "not a string"))?;
        s.trim()
            .parse::<std::net::IpAddr>()
            .map(|ip| RawValue::String(ip.to_string()))
            .map_err(|_| TypeError::new("ip_address", "not a valid IP address"))
    }
}

pub struct ArrayType;
impl ValueType for ArrayType {
    fn name(&self) -> &str {
        "array"
    }
    fn convert(&self, raw: &RawValue) -> Result<RawValue, TypeError> {
        match raw {
            RawValue::Array(items) => Ok(RawValue::Array(items.clone())),
            RawValue::String(s) => Ok(RawValue::Array(
                s.split(',')
                    .map(|part| RawValue::String(part.trim().to_string()))
                    .collect(),
            )),
            _ => Err(TypeError::new("array", "expected an array or comma-separated string")),
        }
    }
}

pub struct JsonType;
impl ValueType for JsonType {
    fn name(&self) -> &str {
        "json"
    }
    fn convert(&self, raw: &RawValue) -> Result<RawValue, TypeError> {
        match raw {
            RawValue::Object(_) | RawValue::Array(_) => Ok(raw.clone()),
            RawValue::String(s) => serde_json::from_str(s)
                .map_err(|e| TypeError::new("json", format!("invalid JSON: {e}"))),
            _ => Err(TypeError::new("json", "expected an object or a JSON string")),
        }
    }
}

pub struct SlugType;
impl ValueType for SlugType {
    fn name(&self) -> &str {
        "slug"
    }
    fn convert(&self, raw: &RawValue) -> Result<RawValue, TypeError> {
        let s = raw_to_string(raw).ok_or_else(|| TypeError::new("slug", "not a string"))?;
        let lowered = s.trim().to_lowercase();
        let whitespace_collapsed = regex::Regex::new(r"\s+")
            .expect("valid regex")
            .replace_all(&lowered, "-")
            .to_string();
        let stripped = regex::Regex::new(r"[^\w-]")
            .expect("valid regex")
            .replace_all(&whitespace_collapsed, "")
            .to_string();
        let collapsed_dashes = regex::Regex::new(r"-+")
            .expect("valid regex")
            .replace_all(&stripped, "-")
            .trim_matches('-')
            .to_string();
        Ok(RawValue::String(collapsed_dashes))
    }
}

fn bounded_int_type(
    name: &'static str,
    min: i64,
    max: i64,
) -> impl ValueType {
    struct BoundedInt {
        name: &'static str,
        min: i64,
        max: i64,
    }
    impl ValueType for BoundedInt {
        fn name(&self) -> &str {
            self.name
        }
        fn convert(&self, raw: &RawValue) -> Result<RawValue, TypeError> {
            let v = to_integer(raw, self.name)?;
            if v < self.min || v > self.max {
                return Err(TypeError::new(
                    self.name,
                    format!("must be between {} and {}", self.min, self.max),
                ));
            }
            Ok(RawValue::from(v))
        }
    }
    BoundedInt { name, min, max }
}

fn enum_int_type(name: &'static str, allowed: &'static [i64]) -> impl ValueType {
    struct EnumInt {
        name: &'static str,
        allowed: &'static [i64],
    }
    impl ValueType for EnumInt {
        fn name(&self) -> &str {
            self.name
        }
        fn convert(&self, raw: &RawValue) -> Result<RawValue, TypeError> {
            let v = to_integer(raw, self.name)?;
            if !self.allowed.contains(&v) {
                return Err(TypeError::new(
                    self.name,
                    format!("must be one of {:?}", self.allowed),
                ));
            }
            Ok(RawValue::from(v))
        }
    }
    EnumInt { name, allowed }
}

pub struct PasswordType {
    hasher: Arc<dyn PasswordHasher>,
}

impl ValueType for PasswordType {
    fn name(&self) -> &str {
        "password"
    }
    fn convert(&self, raw: &RawValue) -> Result<RawValue, TypeError> {
        let s = raw_to_string(raw).ok_or_else(|| TypeError::new("password", "not a string"))?;
        Ok(RawValue::String(self.hasher.hash(&s)))
    }
}

pub struct FileType;
impl ValueType for FileType {
    fn name(&self) -> &str {
        "file"
    }
    fn convert(&self, raw: &RawValue) -> Result<RawValue, TypeError> {
        Ok(raw.clone())
    }
}

/// Helper used by callers assembling JSON test fixtures for the `json` type.
pub fn empty_object() -> RawValue {
    RawValue::Object(Map::new())
}

/// Every built-in type from spec §4.2, ready to hand to a fresh `TypeRegistry`.
pub fn builtin_types(hasher: Arc<dyn PasswordHasher>) -> Vec<Arc<dyn ValueType>> {
    vec![
        Arc::new(ObjType),
        Arc::new(StringType),
        Arc::new(LstrType),
        Arc::new(TextType),
        Arc::new(DateType),
        Arc::new(EnumType),
        Arc::new(LogCategoryType),
        Arc::new(BooleanType),
        Arc::new(IntType),
        Arc::new(UintType),
        Arc::new(NumberType),
        Arc::new(FloatType),
        Arc::new(PercentageType),
        Arc::new(UfloatType),
        Arc::new(DecimalType),
        Arc::new(CurrencyType),
        Arc::new(DatetimeType),
        Arc::new(regex_type(
            "time",
            r"^(0?\d|1\d|2[0-3]):[0-5]\d(:[0-5]\d)?$",
            "not a valid HH:MM[:SS] time",
        )),
        Arc::new(regex_type(
            "email",
            r"^[^\s@]+@[^\s@]+\.[^\s@]+$",
            "not a valid email address",
        )),
        Arc::new(regex_type(
            "url",
            r"^[a-zA-Z][a-zA-Z0-9+.-]*://[^\s]+$",
            "not a valid URL",
        )),
        Arc::new(regex_type(
            "phone",
            r"^\+?[0-9()\-\s]{7,20}$",
            "not a valid phone number",
        )),
        Arc::new(regex_type(
            "color",
            r"^#(?:[0-9a-fA-F]{3}|[0-9a-fA-F]{6})$",
            "not a valid hex color",
        )),
        Arc::new(UuidType),
        Arc::new(IpAddressType),
        Arc::new(ArrayType),
        Arc::new(JsonType),
        Arc::new(SlugType),
        Arc::new(bounded_int_type("age", 0, 200)),
        Arc::new(enum_int_type("gender", &[0, 1])),
        Arc::new(enum_int_type("log_level", &[0, 1, 2, 3])),
        Arc::new(PasswordType { hasher }),
        Arc::new(FileType),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use assertr::prelude::*;
    use serde_json::json;

    fn registry() -> super::super::TypeRegistry {
        super::super::TypeRegistry::with_builtins(Arc::new(NoopPasswordHasher))
    }

    #[test]
    fn string_trims_but_lstr_does_not() {
        let types = registry();
        assert_that(types.get("string").unwrap().convert(&json!("  hi  ")).unwrap())
            .is_equal_to(json!("hi"));
        assert_that(types.get("lstr").unwrap().convert(&json!("  hi  ")).unwrap())
            .is_equal_to(json!("  hi  "));
    }

    #[test]
    fn int_rejects_fractional_values() {
        let types = registry();
        assert_that(types.get("int").unwrap().convert(&json!(5)).unwrap()).is_equal_to(json!(5));
        assert_that(types.get("int").unwrap().convert(&json!("42")).unwrap())
            .is_equal_to(json!(42));
        assert_that(types.get("int").unwrap().convert(&json!(4.5)).is_err()).is_true();
    }

    #[test]
    fn uint_rejects_negative_values() {
        let types = registry();
        assert_that(types.get("uint").unwrap().convert(&json!(-1)).is_err()).is_true();
        assert_that(types.get("uint").unwrap().convert(&json!(0)).unwrap()).is_equal_to(json!(0));
    }

    #[test]
    fn float_rounds_half_up_to_two_decimals() {
        let types = registry();
        assert_that(types.get("float").unwrap().convert(&json!(1.005)).unwrap())
            .is_equal_to(json!(1.01));
        assert_that(types.get("float").unwrap().convert(&json!(1.004)).unwrap())
            .is_equal_to(json!(1.0));
    }

    #[test]
    fn boolean_accepts_bool_and_string_forms() {
        let types = registry();
        let b = types.get("boolean").unwrap();
        assert_that(b.convert(&json!(true)).unwrap()).is_equal_to(json!(true));
        assert_that(b.convert(&json!("false")).unwrap()).is_equal_to(json!(false));
        assert_that(b.convert(&json!("nope")).is_err()).is_true();
    }

    #[test]
    fn array_splits_comma_separated_strings() {
        let types = registry();
        let a = types.get("array").unwrap();
        assert_that(a.convert(&json!("a, b,c")).unwrap())
            .is_equal_to(json!(["a", "b", "c"]));
        assert_that(a.convert(&json!(["x", "y"])).unwrap()).is_equal_to(json!(["x", "y"]));
    }

    #[test]
    fn slug_normalizes_arbitrary_text() {
        let types = registry();
        let s = types.get("slug").unwrap();
        assert_that(s.convert(&json!("  Hello, World!  ")).unwrap())
            .is_equal_to(json!("hello-world"));
    }

    #[test]
    fn age_enforces_bounds() {
        let types = registry();
        let age = types.get("age").unwrap();
        assert_that(age.convert(&json!(200)).unwrap()).is_equal_to(json!(200));
        assert_that(age.convert(&json!(201)).is_err()).is_true();
        assert_that(age.convert(&json!(-1)).is_err()).is_true();
    }

    #[test]
    fn email_rejects_malformed_addresses() {
        let types = registry();
        let email = types.get("email").unwrap();
        assert_that(email.convert(&json!("a@b.com")).is_ok()).is_true();
        assert_that(email.convert(&json!("not-an-email")).is_err()).is_true();
    }

    #[test]
    fn round_trip_is_idempotent_for_accepted_values() {
        let types = registry();
        for (type_name, value) in [
            ("string", json!("hello")),
            ("int", json!(7)),
            ("boolean", json!(true)),
            ("slug", json!("already-a-slug")),
        ] {
            let converter = types.get(type_name).unwrap();
            let once = converter.convert(&value).unwrap();
            let twice = converter.convert(&once).unwrap();
            assert_that(twice).is_equal_to(once);
        }
    }
}
