use crate::core::attr::{AttrMap, AttrValue};
use crate::core::types::{DataType, Dim, TensorDesc};
use crate::error::ConvertError;
use crate::serializer::proto::{
    AttrValueProto, DimProto, ListInt, ListStr, TensorDescProto, attr_value_proto, dim_proto,
};
use std::collections::BTreeMap;

fn wire_size(v: usize) -> Result<i64, ConvertError> {
    i64::try_from(v).map_err(|_| ConvertError::SizeOutOfRange(v))
}

pub fn tensor_desc_proto(desc: &TensorDesc) -> Result<TensorDescProto, ConvertError> {
    let dtype = desc.dtype.wire_code().ok_or(ConvertError::ElementType(desc.dtype))?;
    let dims = desc
        .shape
        .dims
        .iter()
        .map(|d| {
            let value = match d {
                Dim::Static(v) => dim_proto::Value::Size(wire_size(*v)?),
                Dim::Variable(s) => dim_proto::Value::Symbol(s.clone()),
            };
            Ok(DimProto { value: Some(value) })
        })
        .collect::<Result<Vec<_>, ConvertError>>()?;

    let mut proto = TensorDescProto {
        name: desc.name.clone(),
        dtype,
        dims,
        format: desc.format.to_string(),
        is_ref: desc.is_ref,
        ..Default::default()
    };
    if let Some(origin) = &desc.origin {
        proto.origin_name = origin.node.clone();
        proto.origin_output_index = wire_size(origin.output_index)?;
        proto.origin_dtype = origin.dtype.wire_code().ok_or(ConvertError::ElementType(origin.dtype))?;
        proto.origin_format = origin.format.to_string();
    }
    Ok(proto)
}

pub fn attr_value_proto(value: &AttrValue) -> AttrValueProto {
    use attr_value_proto::Value;
    let value = match value {
        AttrValue::Int(i) => Value::I(*i),
        AttrValue::Float(f) => Value::F(*f),
        AttrValue::Str(s) => Value::S(s.clone()),
        AttrValue::Bool(b) => Value::B(*b),
        AttrValue::Bytes(b) => Value::Bytes(b.clone()),
        AttrValue::ListInt(v) => Value::ListI(ListInt { values: v.clone() }),
        AttrValue::ListStr(v) => Value::ListS(ListStr { values: v.clone() }),
    };
    AttrValueProto { value: Some(value) }
}

/// Fails with the offending key when an attribute has an empty name.
pub fn attr_map_proto(attrs: &AttrMap) -> Result<BTreeMap<String, AttrValueProto>, String> {
    let mut out = BTreeMap::new();
    for (key, value) in attrs {
        if key.is_empty() {
            return Err(key.clone());
        }
        out.insert(key.clone(), attr_value_proto(value));
    }
    Ok(out)
}

/// Element-type codes of a descriptor list.
pub fn dtype_codes(descs: &[TensorDesc]) -> Result<Vec<i64>, DataType> {
    descs
        .iter()
        .map(|d| d.dtype.wire_code().map(i64::from).ok_or(d.dtype))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Format, OutputOrigin, Shape};

    #[test]
    fn symbolic_dims_and_origin_survive() {
        let desc = TensorDesc {
            name: "y".into(),
            dtype: DataType::F16,
            shape: Shape { dims: vec![Dim::Variable("N".into()), Dim::Static(8)] },
            format: Format::NHWC,
            is_ref: false,
            origin: Some(OutputOrigin { node: "a".into(), output_index: 1, dtype: DataType::F16, format: Format::NHWC }),
        };
        let proto = tensor_desc_proto(&desc).unwrap();
        assert_eq!(proto.dims.len(), 2);
        assert_eq!(proto.format, "NHWC");
        assert_eq!(proto.origin_name, "a");
        assert_eq!(proto.origin_output_index, 1);
    }

    #[test]
    fn undefined_dtype_is_reported() {
        let desc = TensorDesc::new("x", DataType::Undefined, &[1]);
        assert_eq!(tensor_desc_proto(&desc), Err(ConvertError::ElementType(DataType::Undefined)));
        assert_eq!(dtype_codes(&[desc]), Err(DataType::Undefined));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn oversized_dim_is_rejected_not_wrapped() {
        let huge = i64::MAX as usize + 1;
        let desc = TensorDesc::new("x", DataType::F32, &[2, huge]);
        assert_eq!(tensor_desc_proto(&desc), Err(ConvertError::SizeOutOfRange(huge)));

        let fits = TensorDesc::new("x", DataType::F32, &[i64::MAX as usize]);
        assert!(tensor_desc_proto(&fits).is_ok());
    }

    #[test]
    fn empty_attr_key_rejected() {
        let mut attrs = AttrMap::new();
        attrs.insert(String::new(), AttrValue::Int(1));
        assert!(attr_map_proto(&attrs).is_err());
    }
}
