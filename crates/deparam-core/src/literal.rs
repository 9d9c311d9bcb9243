//! Folded parameter literals.

use std::fmt;

use ordered_float::OrderedFloat;

/// Width of an unsized integer parameter (`parameter WIDTH = 8`).
pub const INTEGER_WIDTH: u32 = 32;

/// Maximum integer width the engine represents exactly.
pub const MAX_WIDTH: u32 = 128;

/// A constant value produced by the evaluator.
///
/// Integers are stored as their low `width` bits; [`Literal::as_i128`] applies
/// sign extension for signed values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Literal {
    /// A two-state integer of a given width.
    Int { bits: u128, width: u32, signed: bool },
    /// A real (double precision) value.
    Real(OrderedFloat<f64>),
    /// A string value.
    Str(String),
}

#[inline]
fn mask(width: u32) -> u128 {
    if width >= MAX_WIDTH {
        u128::MAX
    } else {
        (1u128 << width) - 1
    }
}

impl Literal {
    /// Build an integer literal, truncating `value` to `width` bits.
    pub fn int(value: i128, width: u32, signed: bool) -> Self {
        let width = width.clamp(1, MAX_WIDTH);
        Literal::Int {
            bits: (value as u128) & mask(width),
            width,
            signed,
        }
    }

    /// A 32-bit signed integer, the type of unsized decimal parameter values.
    pub fn integer(value: i128) -> Self {
        Self::int(value, INTEGER_WIDTH, true)
    }

    /// A real literal.
    pub fn real(value: f64) -> Self {
        Literal::Real(OrderedFloat(value))
    }

    /// A string literal.
    pub fn string(value: impl Into<String>) -> Self {
        Literal::Str(value.into())
    }

    /// A zero of the given width, used as a placeholder after a binding error.
    pub fn zero(width: u32) -> Self {
        Self::int(0, width, false)
    }

    /// Bit width (reals are 64, strings 8 per byte).
    pub fn width(&self) -> u32 {
        match self {
            Literal::Int { width, .. } => *width,
            Literal::Real(_) => 64,
            Literal::Str(s) => (s.len() as u32 * 8).max(8),
        }
    }

    pub fn is_real(&self) -> bool {
        matches!(self, Literal::Real(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Literal::Str(_))
    }

    pub fn is_signed(&self) -> bool {
        match self {
            Literal::Int { signed, .. } => *signed,
            Literal::Real(_) => true,
            Literal::Str(_) => false,
        }
    }

    /// Integer value with sign extension applied; reals round half away from zero.
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Literal::Int {
                bits,
                width,
                signed,
            } => {
                if *signed && *width < MAX_WIDTH && (bits >> (width - 1)) & 1 == 1 {
                    Some((*bits | !mask(*width)) as i128)
                } else {
                    Some(*bits as i128)
                }
            }
            Literal::Real(v) => Some(v.0.round() as i128),
            Literal::Str(_) => None,
        }
    }

    /// Value as a double (integers are converted, strings are `None`).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Literal::Real(v) => Some(v.0),
            Literal::Int { .. } => self.as_i128().map(|v| v as f64),
            Literal::Str(_) => None,
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Literal::Int { bits, .. } => *bits == 0,
            Literal::Real(v) => v.0 == 0.0,
            Literal::Str(s) => s.is_empty(),
        }
    }

    /// Whether the value can be printed directly into a specialization name.
    ///
    /// Only plain 32-bit integers qualify; everything else goes through the
    /// value id table.
    pub fn is_name_safe(&self) -> bool {
        matches!(self, Literal::Int { width, .. } if *width == INTEGER_WIDTH)
    }

    /// Convert the value to `width` bits with the given signedness, the way a
    /// parameter assignment coerces its right-hand side.
    pub fn cast_int(&self, width: u32, signed: bool) -> Option<Literal> {
        self.as_i128().map(|v| Literal::int(v, width, signed))
    }

    /// Textual form of the value, without width or base decorations.
    pub fn ascii(&self) -> String {
        match self {
            Literal::Int { .. } => self.as_i128().unwrap_or_default().to_string(),
            Literal::Real(v) => format!("{}", v.0),
            Literal::Str(s) => format!("\"{}\"", s),
        }
    }

    /// Parse a literal as written in a hierarchical block parameter file.
    ///
    /// Accepts decimal integers (32-bit signed), sized literals `N'd…`, `N'h…`,
    /// `N'b…` with an optional `s`, reals containing `.` or an exponent, and
    /// double-quoted strings.
    pub fn parse_param_literal(text: &str) -> Option<Literal> {
        let text = text.trim();
        if let Some(inner) = text.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
            return Some(Literal::string(inner));
        }
        if let Some((size, rest)) = text.split_once('\'') {
            let width: u32 = size.trim().parse().ok()?;
            let (signed, rest) = match rest.strip_prefix(['s', 'S']) {
                Some(r) => (true, r),
                None => (false, rest),
            };
            let mut chars = rest.chars();
            let radix = match chars.next()?.to_ascii_lowercase() {
                'd' => 10,
                'h' => 16,
                'b' => 2,
                'o' => 8,
                _ => return None,
            };
            let digits: String = chars.filter(|c| *c != '_').collect();
            let value = u128::from_str_radix(&digits, radix).ok()?;
            return Some(Literal::int(value as i128, width, signed));
        }
        if let Ok(v) = text.replace('_', "").parse::<i128>() {
            return Some(Literal::integer(v));
        }
        if text.contains(['.', 'e', 'E']) {
            return text.parse::<f64>().ok().map(Literal::real);
        }
        None
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int {
                width, signed: true, ..
            } => write!(f, "{}'sd{}", width, self.ascii()),
            Literal::Int { width, .. } => write!(f, "{}'d{}", width, self.ascii()),
            _ => write!(f, "{}", self.ascii()),
        }
    }
}
