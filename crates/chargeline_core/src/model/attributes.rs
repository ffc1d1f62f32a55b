//! Writable-attribute allow-list and input coercion.
//!
//! # Responsibility
//! - Filter caller input down to declared writable attributes.
//! - Coerce loosely typed JSON values into a typed `AccountPatch`.
//! - Validate required keys before anything touches storage.
//!
//! # Invariants
//! - Attributes outside `Attributable::FILLABLE` are ignored, never rejected.
//! - `code`, `id` and timestamps can never be set through input.
//! - A patch only carries keys that were present in the input.

use crate::model::account::{Account, AccountId};
use crate::model::credential::PlainPassword;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex")
});

const MAX_NAME_CHARS: usize = 255;

/// Capability: an entity with a mass-assignment allow-list and an outward
/// attribute policy.
pub trait Attributable {
    /// Attribute names that input may set.
    const FILLABLE: &'static [&'static str];
    /// Attribute names never emitted outward.
    const HIDDEN: &'static [&'static str];
    /// Computed attribute names always emitted outward.
    const APPENDS: &'static [&'static str];

    fn is_fillable(attribute: &str) -> bool {
        Self::FILLABLE.contains(&attribute)
    }

    fn is_hidden(attribute: &str) -> bool {
        Self::HIDDEN.contains(&attribute)
    }
}

impl Attributable for Account {
    const FILLABLE: &'static [&'static str] = &[
        "name",
        "email",
        "password",
        "first_name",
        "last_name",
        "phone",
        "credit_card_id",
        "zip_code",
        "city_code",
        "city",
        "prefecture_code",
        "prefecture",
        "address",
        "building_name",
        "status_id",
        "is_checked_tutorial",
        "latitude",
        "longitude",
        "using_app",
    ];
    const HIDDEN: &'static [&'static str] = &["password", "password_hash", "remember_token"];
    const APPENDS: &'static [&'static str] = &["payment_member_id"];
}

/// Validation failures raised before persistence.
#[derive(Debug, Clone, PartialEq)]
pub enum AccountValidationError {
    /// Input root is not a JSON object.
    NotAnObject,
    /// A key required for creation is absent or null.
    MissingRequired(&'static str),
    /// Value cannot be coerced to the attribute type.
    InvalidType {
        attribute: &'static str,
        expected: &'static str,
    },
    /// Text attribute is blank or too long.
    InvalidLength(&'static str),
    /// Email does not look like an address.
    InvalidEmail,
    /// Coordinate outside its valid range.
    OutOfRange { attribute: &'static str, value: f64 },
    /// Referenced row does not exist.
    UnknownReference { attribute: &'static str, id: i64 },
    /// Region segment leaves no room for the code suffix.
    RegionTooLong(&'static str),
    /// Password hashing backend failed.
    PasswordHash(String),
}

impl Display for AccountValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAnObject => write!(f, "account input must be an object"),
            Self::MissingRequired(attribute) => write!(f, "`{attribute}` is required"),
            Self::InvalidType {
                attribute,
                expected,
            } => write!(f, "`{attribute}` must be {expected}"),
            Self::InvalidLength(attribute) => {
                write!(f, "`{attribute}` must be 1..={MAX_NAME_CHARS} characters")
            }
            Self::InvalidEmail => write!(f, "`email` is not a valid address"),
            Self::OutOfRange { attribute, value } => {
                write!(f, "`{attribute}` value {value} is out of range")
            }
            Self::UnknownReference { attribute, id } => {
                write!(f, "`{attribute}` references missing row {id}")
            }
            Self::RegionTooLong(attribute) => {
                write!(f, "`{attribute}` is too long to embed in the account code")
            }
            Self::PasswordHash(message) => write!(f, "password hashing failed: {message}"),
        }
    }
}

impl Error for AccountValidationError {}

/// Loosely typed attribute input, e.g. a decoded request body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeInput(Map<String, Value>);

impl AttributeInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a JSON value, which must be an object.
    pub fn from_json(value: Value) -> Result<Self, AccountValidationError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(AccountValidationError::NotAnObject),
        }
    }

    /// Builder-style setter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for AttributeInput {
    fn from(value: Map<String, Value>) -> Self {
        Self(value)
    }
}

/// Typed view of the fillable keys present in one input.
///
/// Outer `Option` is presence; inner `Option` on nullable attributes is the
/// value, so `Some(None)` clears a column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<PlainPassword>,
    pub first_name: Option<Option<String>>,
    pub last_name: Option<Option<String>>,
    pub phone: Option<Option<String>>,
    pub zip_code: Option<Option<String>>,
    pub city_code: Option<Option<String>>,
    pub city: Option<Option<String>>,
    pub prefecture_code: Option<Option<String>>,
    pub prefecture: Option<Option<String>>,
    pub address: Option<Option<String>>,
    pub building_name: Option<Option<String>>,
    pub latitude: Option<Option<f64>>,
    pub longitude: Option<Option<f64>>,
    pub is_checked_tutorial: Option<bool>,
    pub using_app: Option<bool>,
    pub status_id: Option<i64>,
    pub credit_card_id: Option<Option<i64>>,
}

impl AccountPatch {
    /// Builds a patch from input.
    ///
    /// Returns the patch and the names of ignored (non-fillable) keys.
    pub fn from_input(
        input: &AttributeInput,
    ) -> Result<(Self, Vec<String>), AccountValidationError> {
        let mut patch = Self::default();
        let mut ignored = Vec::new();

        for (key, value) in &input.0 {
            if !Account::is_fillable(key) {
                ignored.push(key.clone());
                continue;
            }
            match key.as_str() {
                "name" => patch.name = Some(required_text("name", value)?),
                "email" => patch.email = Some(normalize_email(value)?),
                "password" => patch.password = Some(password(value)?),
                "first_name" => patch.first_name = Some(optional_text("first_name", value)?),
                "last_name" => patch.last_name = Some(optional_text("last_name", value)?),
                "phone" => patch.phone = Some(optional_text("phone", value)?),
                "zip_code" => patch.zip_code = Some(optional_text("zip_code", value)?),
                "city_code" => patch.city_code = Some(optional_text("city_code", value)?),
                "city" => patch.city = Some(optional_text("city", value)?),
                "prefecture_code" => {
                    patch.prefecture_code = Some(optional_text("prefecture_code", value)?)
                }
                "prefecture" => patch.prefecture = Some(optional_text("prefecture", value)?),
                "address" => patch.address = Some(optional_text("address", value)?),
                "building_name" => {
                    patch.building_name = Some(optional_text("building_name", value)?)
                }
                "latitude" => {
                    patch.latitude = Some(optional_coordinate("latitude", value, 90.0)?)
                }
                "longitude" => {
                    patch.longitude = Some(optional_coordinate("longitude", value, 180.0)?)
                }
                "is_checked_tutorial" => {
                    patch.is_checked_tutorial = Some(flag("is_checked_tutorial", value)?)
                }
                "using_app" => patch.using_app = Some(flag("using_app", value)?),
                "status_id" => match optional_integer("status_id", value)? {
                    Some(id) => patch.status_id = Some(id),
                    None => return Err(AccountValidationError::MissingRequired("status_id")),
                },
                "credit_card_id" => {
                    patch.credit_card_id = Some(optional_integer("credit_card_id", value)?)
                }
                other => ignored.push(other.to_string()),
            }
        }

        Ok((patch, ignored))
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Merges present keys onto an existing account.
    ///
    /// The password is not applied here; callers hash it separately.
    pub fn apply_to(&self, account: &mut Account) {
        fn merge<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *target = value.clone();
            }
        }

        merge(&mut account.name, &self.name);
        merge(&mut account.email, &self.email);
        merge(&mut account.first_name, &self.first_name);
        merge(&mut account.last_name, &self.last_name);
        merge(&mut account.phone, &self.phone);
        merge(&mut account.zip_code, &self.zip_code);
        merge(&mut account.city_code, &self.city_code);
        merge(&mut account.city, &self.city);
        merge(&mut account.prefecture_code, &self.prefecture_code);
        merge(&mut account.prefecture, &self.prefecture);
        merge(&mut account.address, &self.address);
        merge(&mut account.building_name, &self.building_name);
        merge(&mut account.latitude, &self.latitude);
        merge(&mut account.longitude, &self.longitude);
        merge(&mut account.is_checked_tutorial, &self.is_checked_tutorial);
        merge(&mut account.using_app, &self.using_app);
        merge(&mut account.status_id, &self.status_id);
        merge(&mut account.credit_card_id, &self.credit_card_id);
    }

    /// Turns a patch into a creation template.
    ///
    /// `default_status_id` fills a missing `status_id`; without a default the
    /// key is required.
    pub fn into_new_account(
        self,
        default_status_id: Option<i64>,
    ) -> Result<NewAccount, AccountValidationError> {
        let name = self
            .name
            .clone()
            .ok_or(AccountValidationError::MissingRequired("name"))?;
        let email = self
            .email
            .clone()
            .ok_or(AccountValidationError::MissingRequired("email"))?;
        let status_id = self
            .status_id
            .or(default_status_id)
            .ok_or(AccountValidationError::MissingRequired("status_id"))?;

        let mut template = Account {
            id: AccountId::default(),
            code: String::new(),
            name,
            email,
            email_verified_at: None,
            password_hash: None,
            remember_token: None,
            first_name: None,
            last_name: None,
            phone: None,
            zip_code: None,
            city_code: None,
            city: None,
            prefecture_code: None,
            prefecture: None,
            address: None,
            building_name: None,
            latitude: None,
            longitude: None,
            is_checked_tutorial: false,
            using_app: false,
            status_id,
            credit_card_id: None,
            created_at: 0,
            updated_at: 0,
            deleted_at: None,
            relations: Default::default(),
        };
        self.apply_to(&mut template);

        Ok(NewAccount {
            template,
            password: self.password,
        })
    }
}

/// Validated creation input: an unsaved account plus its plain password.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAccount {
    /// `id`, `code` and timestamps are placeholders until insert.
    pub template: Account,
    pub password: Option<PlainPassword>,
}

fn required_text(attribute: &'static str, value: &Value) -> Result<String, AccountValidationError> {
    match optional_text(attribute, value)? {
        Some(text) => Ok(text),
        None => Err(AccountValidationError::MissingRequired(attribute)),
    }
}

fn optional_text(
    attribute: &'static str,
    value: &Value,
) -> Result<Option<String>, AccountValidationError> {
    let text = match value {
        Value::Null => return Ok(None),
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        _ => {
            return Err(AccountValidationError::InvalidType {
                attribute,
                expected: "a string",
            })
        }
    };
    if text.is_empty() || text.chars().count() > MAX_NAME_CHARS {
        return Err(AccountValidationError::InvalidLength(attribute));
    }
    Ok(Some(text))
}

fn normalize_email(value: &Value) -> Result<String, AccountValidationError> {
    let email = required_text("email", value)?;
    if !EMAIL_RE.is_match(&email) {
        return Err(AccountValidationError::InvalidEmail);
    }
    Ok(email)
}

fn password(value: &Value) -> Result<PlainPassword, AccountValidationError> {
    match value {
        Value::String(text) => {
            let password = PlainPassword::new(text.as_str());
            if password.is_blank() {
                return Err(AccountValidationError::InvalidLength("password"));
            }
            Ok(password)
        }
        Value::Null => Err(AccountValidationError::MissingRequired("password")),
        _ => Err(AccountValidationError::InvalidType {
            attribute: "password",
            expected: "a string",
        }),
    }
}

fn optional_integer(
    attribute: &'static str,
    value: &Value,
) -> Result<Option<i64>, AccountValidationError> {
    let invalid = AccountValidationError::InvalidType {
        attribute,
        expected: "an integer",
    };
    match value {
        Value::Null => Ok(None),
        Value::Number(number) => number.as_i64().map(Some).ok_or(invalid),
        Value::String(text) => text.trim().parse::<i64>().map(Some).map_err(|_| invalid),
        _ => Err(invalid),
    }
}

fn optional_coordinate(
    attribute: &'static str,
    value: &Value,
    bound: f64,
) -> Result<Option<f64>, AccountValidationError> {
    let invalid = AccountValidationError::InvalidType {
        attribute,
        expected: "a number",
    };
    let number = match value {
        Value::Null => return Ok(None),
        Value::Number(number) => number.as_f64().ok_or(invalid)?,
        Value::String(text) => text.trim().parse::<f64>().map_err(|_| invalid)?,
        _ => return Err(invalid),
    };
    if !number.is_finite() || number.abs() > bound {
        return Err(AccountValidationError::OutOfRange {
            attribute,
            value: number,
        });
    }
    Ok(Some(number))
}

fn flag(attribute: &'static str, value: &Value) -> Result<bool, AccountValidationError> {
    let invalid = AccountValidationError::InvalidType {
        attribute,
        expected: "a boolean",
    };
    match value {
        Value::Bool(flag) => Ok(*flag),
        Value::Number(number) => match number.as_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(invalid),
        },
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "1" | "true" => Ok(true),
            "0" | "false" => Ok(false),
            _ => Err(invalid),
        },
        _ => Err(invalid),
    }
}
