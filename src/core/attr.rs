use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A typed value in a node's attribute bag.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum AttrValue {
    Int(i64),
    Float(f32),
    Str(String),
    Bool(bool),
    Bytes(Vec<u8>),
    ListInt(Vec<i64>),
    ListStr(Vec<String>),
}

pub type AttrMap = BTreeMap<String, AttrValue>;

impl AttrValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list_str(&self) -> Option<&[String]> {
        match self {
            AttrValue::ListStr(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list_int(&self) -> Option<&[i64]> {
        match self {
            AttrValue::ListInt(v) => Some(v),
            _ => None,
        }
    }
}
