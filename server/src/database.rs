//! Database collaborator seen as "run a statement, get typed rows back"
//!
//! The server never talks SQL dialects or manages connections; it only needs
//! [`Database::query`] and [`Database::execute`]. Calls are made from worker
//! jobs, never from the tick thread. [`MemoryDatabase`] answers the profile
//! statements in-process and is what the binary runs with when no external
//! store is wired in.

use crate::error::DbError;
use log::debug;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

pub const SELECT_PROFILE: &str =
    "SELECT name, total_kills, rating, banned, preferred_weapon FROM profiles WHERE name = ?";
pub const INSERT_PROFILE: &str =
    "INSERT INTO profiles (name, total_kills, rating, banned, preferred_weapon) VALUES (?, 0, 1000.0, FALSE, 0)";
pub const ADD_KILLS: &str = "UPDATE profiles SET total_kills = total_kills + ? WHERE name = ?";

/// A typed column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Binary(Vec<u8>),
    Bool(bool),
    Char(char),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    Text(String),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Binary(_) => "binary",
            Value::Bool(_) => "bool",
            Value::Char(_) => "char",
            Value::Int16(_) => "int16",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Text(_) => "text",
        }
    }
}

/// Conversion from a column value to a Rust type.
pub trait FromValue: Sized {
    const EXPECTED: &'static str;

    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! impl_from_value {
    ($ty:ty, $expected:literal, $variant:ident) => {
        impl FromValue for $ty {
            const EXPECTED: &'static str = $expected;

            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }
        }
    };
}

impl_from_value!(Vec<u8>, "binary", Binary);
impl_from_value!(bool, "bool", Bool);
impl_from_value!(char, "char", Char);
impl_from_value!(i16, "int16", Int16);
impl_from_value!(i32, "int32", Int32);
impl_from_value!(i64, "int64", Int64);
impl_from_value!(f32, "float", Float);
impl_from_value!(f64, "double", Double);
impl_from_value!(String, "text", Text);

impl<T: FromValue> FromValue for Option<T> {
    const EXPECTED: &'static str = T::EXPECTED;

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            other => T::from_value(other).map(Some),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, value: Value) -> Self {
        self.columns.push((column.to_string(), value));
        self
    }

    pub fn value(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn get<T: FromValue>(&self, column: &str) -> Result<T, DbError> {
        let value = self
            .value(column)
            .ok_or_else(|| DbError::MissingColumn(column.to_string()))?;
        T::from_value(value).ok_or_else(|| DbError::TypeMismatch {
            column: column.to_string(),
            expected: T::EXPECTED,
            found: value.type_name(),
        })
    }
}

pub trait Database: Send + Sync {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DbError>;

    /// Runs a statement and returns the number of affected rows.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, DbError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerProfile {
    pub name: String,
    pub total_kills: i64,
    pub rating: f64,
    pub banned: bool,
    pub preferred_weapon: i16,
}

impl PlayerProfile {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            total_kills: 0,
            rating: 1000.0,
            banned: false,
            preferred_weapon: 0,
        }
    }

    pub fn from_row(row: &Row) -> Result<Self, DbError> {
        Ok(Self {
            name: row.get("name")?,
            total_kills: row.get("total_kills")?,
            rating: row.get("rating")?,
            banned: row.get("banned")?,
            preferred_weapon: row.get("preferred_weapon")?,
        })
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("name", Value::Text(self.name.clone()))
            .with("total_kills", Value::Int64(self.total_kills))
            .with("rating", Value::Double(self.rating))
            .with("banned", Value::Bool(self.banned))
            .with("preferred_weapon", Value::Int16(self.preferred_weapon))
    }
}

/// Loads the named profile, creating a fresh one on first login.
pub fn load_or_create_profile(db: &dyn Database, name: &str) -> Result<PlayerProfile, DbError> {
    let params = [Value::Text(name.to_string())];
    if let Some(row) = db.query(SELECT_PROFILE, &params)?.first() {
        return PlayerProfile::from_row(row);
    }

    debug!("Creating profile for {}", name);
    db.execute(INSERT_PROFILE, &params)?;
    db.query(SELECT_PROFILE, &params)?
        .first()
        .map(PlayerProfile::from_row)
        .unwrap_or_else(|| Err(DbError::Unavailable))
}

pub fn record_kills(db: &dyn Database, name: &str, kills: u32) -> Result<(), DbError> {
    db.execute(
        ADD_KILLS,
        &[Value::Int64(i64::from(kills)), Value::Text(name.to_string())],
    )?;
    Ok(())
}

/// In-process store answering the profile statements.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    profiles: RwLock<HashMap<String, PlayerProfile>>,
    unavailable: AtomicBool,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profiles(profiles: impl IntoIterator<Item = PlayerProfile>) -> Self {
        let db = Self::new();
        {
            let mut table = db.profiles.write();
            for profile in profiles {
                table.insert(profile.name.clone(), profile);
            }
        }
        db
    }

    /// Simulates an outage: every call fails until re-enabled.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn profile(&self, name: &str) -> Option<PlayerProfile> {
        self.profiles.read().get(name).cloned()
    }

    fn check_available(&self) -> Result<(), DbError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(DbError::Unavailable)
        } else {
            Ok(())
        }
    }
}

fn text_param(params: &[Value], index: usize) -> Result<String, DbError> {
    match params.get(index) {
        Some(Value::Text(text)) => Ok(text.clone()),
        _ => Err(DbError::MissingParameter(index)),
    }
}

impl Database for MemoryDatabase {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DbError> {
        self.check_available()?;
        match sql {
            SELECT_PROFILE => {
                let name = text_param(params, 0)?;
                Ok(self
                    .profiles
                    .read()
                    .get(&name)
                    .map(PlayerProfile::to_row)
                    .into_iter()
                    .collect())
            }
            other => Err(DbError::Unsupported(other.to_string())),
        }
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, DbError> {
        self.check_available()?;
        match sql {
            INSERT_PROFILE => {
                let name = text_param(params, 0)?;
                let mut profiles = self.profiles.write();
                if profiles.contains_key(&name) {
                    return Ok(0);
                }
                profiles.insert(name.clone(), PlayerProfile::new(&name));
                Ok(1)
            }
            ADD_KILLS => {
                let kills = match params.first() {
                    Some(Value::Int64(kills)) => *kills,
                    _ => return Err(DbError::MissingParameter(0)),
                };
                let name = text_param(params, 1)?;
                match self.profiles.write().get_mut(&name) {
                    Some(profile) => {
                        profile.total_kills += kills;
                        Ok(1)
                    }
                    None => Ok(0),
                }
            }
            other => Err(DbError::Unsupported(other.to_string())),
        }
    }
}
