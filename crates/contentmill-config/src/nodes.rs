// Helper functions for extracting values from KDL nodes

use kdl::{KdlDocument, KdlNode, KdlValue};

use crate::{ConfigError, ConfigResult};

pub(crate) fn first_arg(node: &KdlNode) -> Option<&KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .map(|e| e.value())
}

pub(crate) fn first_string_arg(node: &KdlNode) -> Option<String> {
    first_arg(node)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

pub(crate) fn all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

pub(crate) fn string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn to_usize(field: &str, value: &KdlValue) -> ConfigResult<usize> {
    let n = value
        .as_integer()
        .ok_or_else(|| ConfigError::invalid(field, "expected an integer"))?;
    usize::try_from(n).map_err(|_| ConfigError::invalid(field, format!("{n} is out of range")))
}

fn to_f64(field: &str, value: &KdlValue) -> ConfigResult<f64> {
    value
        .as_float()
        .or_else(|| value.as_integer().map(|n| n as f64))
        .ok_or_else(|| ConfigError::invalid(field, "expected a number"))
}

/// Unsigned integer from the node's first argument.
pub(crate) fn usize_arg(node: &KdlNode) -> ConfigResult<usize> {
    let field = node.name().value();
    let value =
        first_arg(node).ok_or_else(|| ConfigError::MissingField(format!("{field} value")))?;
    to_usize(field, value)
}

/// Unsigned integer property, if present.
pub(crate) fn usize_prop(node: &KdlNode, name: &str) -> ConfigResult<Option<usize>> {
    node.get(name).map(|v| to_usize(name, v)).transpose()
}

pub(crate) fn f64_arg(node: &KdlNode) -> ConfigResult<f64> {
    let field = node.name().value();
    let value =
        first_arg(node).ok_or_else(|| ConfigError::MissingField(format!("{field} value")))?;
    to_f64(field, value)
}

pub(crate) fn required_string_arg(node: &KdlNode) -> ConfigResult<String> {
    first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField(format!("{} value", node.name().value())))
}

/// Child nodes of a block, or nothing for a node without one.
pub(crate) fn children(node: &KdlNode) -> &[KdlNode] {
    node.children().map(KdlDocument::nodes).unwrap_or(&[])
}
