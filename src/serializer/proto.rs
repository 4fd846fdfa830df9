//! Descriptor message types via prost derive.
//!
//! Attribute maps use `btree_map` so that encoding is ordered and
//! byte-identical across runs.

use prost::Message;
use std::collections::BTreeMap;

/// One dimension of a tensor shape: fixed size or symbolic name.
#[derive(Clone, PartialEq, Message)]
pub struct DimProto {
    #[prost(oneof = "dim_proto::Value", tags = "1, 2")]
    pub value: Option<dim_proto::Value>,
}

pub mod dim_proto {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        #[prost(int64, tag = "1")]
        Size(i64),
        #[prost(string, tag = "2")]
        Symbol(String),
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct TensorDescProto {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int32, tag = "2")]
    pub dtype: i32,
    #[prost(message, repeated, tag = "3")]
    pub dims: Vec<DimProto>,
    #[prost(string, tag = "4")]
    pub format: String,
    #[prost(bool, tag = "5")]
    pub is_ref: bool,
    /// Provenance of call-site outputs; empty on ordinary nodes.
    #[prost(string, tag = "6")]
    pub origin_name: String,
    #[prost(int64, tag = "7")]
    pub origin_output_index: i64,
    #[prost(int32, tag = "8")]
    pub origin_dtype: i32,
    #[prost(string, tag = "9")]
    pub origin_format: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ListInt {
    #[prost(int64, repeated, tag = "1")]
    pub values: Vec<i64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ListStr {
    #[prost(string, repeated, tag = "1")]
    pub values: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct AttrValueProto {
    #[prost(oneof = "attr_value_proto::Value", tags = "1, 2, 3, 4, 5, 6, 7")]
    pub value: Option<attr_value_proto::Value>,
}

pub mod attr_value_proto {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        #[prost(int64, tag = "1")]
        I(i64),
        #[prost(float, tag = "2")]
        F(f32),
        #[prost(string, tag = "3")]
        S(String),
        #[prost(bool, tag = "4")]
        B(bool),
        #[prost(bytes = "vec", tag = "5")]
        Bytes(Vec<u8>),
        #[prost(message, tag = "6")]
        ListI(super::ListInt),
        #[prost(message, tag = "7")]
        ListS(super::ListStr),
    }
}

/// A single operator, either standalone or inside a function body.
#[derive(Clone, PartialEq, Message)]
pub struct NodeDefProto {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub op: String,
    /// Data sources as `node:idx` or `_arg:k`, control sources as `^node`.
    #[prost(string, repeated, tag = "3")]
    pub input: Vec<String>,
    #[prost(message, repeated, tag = "4")]
    pub input_desc: Vec<TensorDescProto>,
    #[prost(message, repeated, tag = "5")]
    pub output_desc: Vec<TensorDescProto>,
    #[prost(btree_map = "string, message", tag = "6")]
    pub attr: BTreeMap<String, AttrValueProto>,
}

#[derive(Clone, PartialEq, Message)]
pub struct FunctionDefProto {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, repeated, tag = "2")]
    pub input_arg: Vec<TensorDescProto>,
    #[prost(message, repeated, tag = "3")]
    pub output_arg: Vec<TensorDescProto>,
    /// Output k of the function is produced by `ret[k]` (`node:idx`).
    #[prost(string, repeated, tag = "4")]
    pub ret: Vec<String>,
    #[prost(message, repeated, tag = "5")]
    pub node_def: Vec<NodeDefProto>,
}

#[derive(Clone, PartialEq, Message)]
pub struct FunctionLibraryProto {
    #[prost(message, repeated, tag = "1")]
    pub function: Vec<FunctionDefProto>,
}
