//! Detection of raw, uninspectable expressions
//!
//! Clients that accept raw expressions describe where those fragments live
//! by implementing [`RawInspect`] on their argument types. The gate walks
//! every argument and callback result handed to a gated builder and refuses
//! fragments that are not produced by an allow-listed helper.

use rowgate_common::{metrics, RowGateError};

/// A raw fragment found inside a value
#[derive(Debug, Clone, Copy)]
pub struct RawFragment<'a> {
    /// Name of the helper that produced the fragment, if any
    pub helper: Option<&'a str>,
    /// Text of the fragment, for error messages
    pub text: &'a str,
}

/// Values that may carry raw fragments
pub trait RawInspect {
    fn visit_raw(&self, visit: &mut dyn FnMut(RawFragment<'_>));
}

impl<T: RawInspect> RawInspect for [T] {
    fn visit_raw(&self, visit: &mut dyn FnMut(RawFragment<'_>)) {
        for item in self {
            item.visit_raw(visit);
        }
    }
}

impl<T: RawInspect> RawInspect for Vec<T> {
    fn visit_raw(&self, visit: &mut dyn FnMut(RawFragment<'_>)) {
        self.as_slice().visit_raw(visit);
    }
}

impl<T: RawInspect> RawInspect for Option<T> {
    fn visit_raw(&self, visit: &mut dyn FnMut(RawFragment<'_>)) {
        if let Some(inner) = self {
            inner.visit_raw(visit);
        }
    }
}

impl<T: RawInspect + ?Sized> RawInspect for Box<T> {
    fn visit_raw(&self, visit: &mut dyn FnMut(RawFragment<'_>)) {
        (**self).visit_raw(visit);
    }
}

impl RawInspect for serde_json::Value {
    fn visit_raw(&self, _visit: &mut dyn FnMut(RawFragment<'_>)) {}
}

/// First fragment not produced by an allowed helper
pub fn find_disallowed<T: RawInspect + ?Sized>(value: &T, allowed: &[String]) -> Option<String> {
    let mut found = None;
    value.visit_raw(&mut |fragment| {
        if found.is_some() {
            return;
        }
        let permitted = fragment
            .helper
            .is_some_and(|helper| allowed.iter().any(|a| a == helper));
        if !permitted {
            found = Some(fragment.text.to_string());
        }
    });
    found
}

pub fn assert_no_raw<T: RawInspect + ?Sized>(
    value: &T,
    allowed: &[String],
) -> Result<(), RowGateError> {
    match find_disallowed(value, allowed) {
        None => Ok(()),
        Some(text) => {
            metrics::record_unsupported("raw_fragment");
            Err(RowGateError::unsupported(format!(
                "RowGate does not support raw fragments (`{text}`) while gated. \
                 If you need raw expressions, use the ungated handle instead."
            )))
        }
    }
}
