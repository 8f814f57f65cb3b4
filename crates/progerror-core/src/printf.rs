use std::fmt::{self, Write};
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::strerror::{describe, last_os_error_code};
use crate::FormatError;

/// `%[n$][flags][width][.precision][length]conversion`
const DIRECTIVE: &str = concat!(
    r"%(?:(?P<pos>[1-9][0-9]*)\$)?",
    r"(?P<flags>[-+ #0']*)",
    r"(?P<width>\*(?:[1-9][0-9]*\$)?|[0-9]+)?",
    r"(?:\.(?P<prec>\*(?:[1-9][0-9]*\$)?|[0-9]*))?",
    r"(?P<len>hh|h|ll|l|L|q|j|z|Z|t)?",
    r"(?P<conv>[diouxXeEfFgGaAcCsSpnm%])",
);

/// Highest positional index accepted when listing argument kinds.
const MAX_POSITION: usize = 4096;

/// One typed argument for a printf-style format string.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Arg<'a> {
    Int(i64),
    Uint(u64),
    Float(f64),
    Char(char),
    Str(&'a str),
    /// An address; `Ptr(0)` is the null pointer.
    Ptr(usize),
}

/// The kind of value a directive consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgKind {
    Int,
    Uint,
    Float,
    Char,
    Str,
    Ptr,
}

impl ArgKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArgKind::Int => "an integer",
            ArgKind::Uint => "an unsigned integer",
            ArgKind::Float => "a floating-point number",
            ArgKind::Char => "a character",
            ArgKind::Str => "a string",
            ArgKind::Ptr => "a pointer",
        }
    }
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'a> Arg<'a> {
    pub fn kind(&self) -> ArgKind {
        match self {
            Arg::Int(_) => ArgKind::Int,
            Arg::Uint(_) => ArgKind::Uint,
            Arg::Float(_) => ArgKind::Float,
            Arg::Char(_) => ArgKind::Char,
            Arg::Str(_) => ArgKind::Str,
            Arg::Ptr(_) => ArgKind::Ptr,
        }
    }

    /// Convert a textual operand for a directive expecting `kind`, the way `printf(1)` does.
    ///
    /// Integers may be decimal, `0x` hexadecimal or `0`-prefixed octal; an operand starting
    /// with a quote yields the code of the character after it. Returns `None` when a numeric
    /// operand does not parse.
    pub fn parse_operand(raw: &'a str, kind: ArgKind) -> Option<Arg<'a>> {
        match kind {
            ArgKind::Int => i64::try_from(parse_integer(raw)?).ok().map(Arg::Int),
            ArgKind::Uint => {
                let v = parse_integer(raw)?;
                let wrapped = if v < 0 {
                    i64::try_from(v).ok().map(|n| n as u64)
                } else {
                    u64::try_from(v).ok()
                };
                wrapped.map(Arg::Uint)
            }
            ArgKind::Ptr => usize::try_from(parse_integer(raw)?).ok().map(Arg::Ptr),
            ArgKind::Float => match quoted_char(raw) {
                Some(c) => Some(Arg::Float(f64::from(c))),
                None => raw.trim().parse::<f64>().ok().map(Arg::Float),
            },
            ArgKind::Char => Some(Arg::Char(raw.chars().next().unwrap_or('\0'))),
            ArgKind::Str => Some(Arg::Str(raw)),
        }
    }

    /// The value `printf(1)` substitutes for an operand that was not supplied.
    pub fn missing(kind: ArgKind) -> Arg<'static> {
        match kind {
            ArgKind::Int => Arg::Int(0),
            ArgKind::Uint => Arg::Uint(0),
            ArgKind::Float => Arg::Float(0.0),
            ArgKind::Char => Arg::Char('\0'),
            ArgKind::Str => Arg::Str(""),
            ArgKind::Ptr => Arg::Ptr(0),
        }
    }
}

fn quoted_char(raw: &str) -> Option<u32> {
    let rest = raw.strip_prefix('\'').or_else(|| raw.strip_prefix('"'))?;
    Some(rest.chars().next().map_or(0, u32::from))
}

fn parse_integer(raw: &str) -> Option<i128> {
    if let Some(c) = quoted_char(raw) {
        return Some(i128::from(c));
    }
    let s = raw.trim_start();
    let (negative, s) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let hex = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"));
    let (radix, digits) = if let Some(hex) = hex {
        (16, hex)
    } else if s.len() > 1 && s.starts_with('0') {
        (8, &s[1..])
    } else {
        (10, s)
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    let magnitude = i128::from_str_radix(digits, radix).ok()?;
    if negative {
        magnitude.checked_neg()
    } else {
        Some(magnitude)
    }
}

macro_rules! arg_from {
    ($variant:ident as $target:ty: $($t:ty),*) => {
        $(
            impl From<$t> for Arg<'_> {
                fn from(v: $t) -> Self {
                    Arg::$variant(v as $target)
                }
            }
        )*
    };
}

arg_from!(Int as i64: i8, i16, i32, i64, isize);
arg_from!(Uint as u64: u8, u16, u32, u64, usize);
arg_from!(Float as f64: f32, f64);

impl From<char> for Arg<'_> {
    fn from(v: char) -> Self {
        Arg::Char(v)
    }
}

impl<'a> From<&'a str> for Arg<'a> {
    fn from(v: &'a str) -> Self {
        Arg::Str(v)
    }
}

impl<'a> From<&'a String> for Arg<'a> {
    fn from(v: &'a String) -> Self {
        Arg::Str(v.as_str())
    }
}

impl<'a> From<Option<&'a str>> for Arg<'a> {
    fn from(v: Option<&'a str>) -> Self {
        v.map_or(Arg::Ptr(0), Arg::Str)
    }
}

impl<T> From<*const T> for Arg<'_> {
    fn from(v: *const T) -> Self {
        Arg::Ptr(v as usize)
    }
}

impl<T> From<*mut T> for Arg<'_> {
    fn from(v: *mut T) -> Self {
        Arg::Ptr(v as usize)
    }
}

fn directive_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(DIRECTIVE).expect("directive pattern compiles"))
}

#[derive(Debug, Clone, Copy, Default)]
struct Flags {
    left: bool,
    plus: bool,
    space: bool,
    alt: bool,
    zero: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Count {
    Fixed(usize),
    Next,
    At(usize),
}

/// Integer width selected by a length modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Length {
    Char,
    Short,
    Default,
    Wide,
}

#[derive(Debug, Clone)]
struct Directive<'f> {
    text: &'f str,
    position: Option<usize>,
    flags: Flags,
    width: Option<Count>,
    precision: Option<Count>,
    length: Length,
    conv: char,
}

enum Piece<'f> {
    Text(&'f str),
    Directive(Directive<'f>),
}

fn parse_index(s: &str) -> usize {
    s.trim_end_matches('$').parse().unwrap_or(usize::MAX)
}

fn parse_count(s: &str) -> Count {
    match s.strip_prefix('*') {
        Some("") => Count::Next,
        Some(pos) => Count::At(parse_index(pos)),
        None => Count::Fixed(s.parse().unwrap_or(0)),
    }
}

impl<'f> Directive<'f> {
    fn from_captures(caps: &Captures<'f>, text: &'f str) -> Self {
        let mut flags = Flags::default();
        for c in caps.name("flags").map_or("", |m| m.as_str()).chars() {
            match c {
                '-' => flags.left = true,
                '+' => flags.plus = true,
                ' ' => flags.space = true,
                '#' => flags.alt = true,
                '0' => flags.zero = true,
                // Thousands grouping: the C locale has no separator.
                _ => {}
            }
        }
        let length = match caps.name("len").map(|m| m.as_str()) {
            Some("hh") => Length::Char,
            Some("h") => Length::Short,
            Some(_) => Length::Wide,
            None => Length::Default,
        };
        Directive {
            text,
            position: caps.name("pos").map(|m| parse_index(m.as_str())),
            flags,
            width: caps.name("width").map(|m| parse_count(m.as_str())),
            precision: caps.name("prec").map(|m| match m.as_str() {
                "" => Count::Fixed(0),
                s => parse_count(s),
            }),
            length,
            conv: caps
                .name("conv")
                .and_then(|m| m.as_str().chars().next())
                .unwrap_or('%'),
        }
    }

    fn mismatch(&self, expected: ArgKind, found: Arg<'_>) -> FormatError {
        FormatError::TypeMismatch {
            directive: self.text.to_string(),
            expected,
            found: found.kind(),
        }
    }

    fn value_kind(&self) -> Option<ArgKind> {
        match self.conv {
            'd' | 'i' => Some(ArgKind::Int),
            'u' | 'o' | 'x' | 'X' => Some(ArgKind::Uint),
            'e' | 'E' | 'f' | 'F' | 'g' | 'G' | 'a' | 'A' => Some(ArgKind::Float),
            'c' | 'C' => Some(ArgKind::Char),
            's' | 'S' => Some(ArgKind::Str),
            'p' | 'n' => Some(ArgKind::Ptr),
            _ => None,
        }
    }

    /// Resolve a `*` width or precision to the `int` argument it names.
    fn star(&self, count: Count, cursor: &mut Cursor<'_, '_>) -> Result<i64, FormatError> {
        let position = match count {
            Count::At(p) => Some(p),
            _ => None,
        };
        match cursor.take(position, self.text)? {
            Arg::Int(v) => Ok(i64::from(v as i32)),
            Arg::Uint(v) => Ok(i64::from(v as i32)),
            other => Err(self.mismatch(ArgKind::Int, other)),
        }
    }

    fn signed(&self, arg: Arg<'_>) -> Result<i64, FormatError> {
        let raw = match arg {
            Arg::Int(v) => v,
            Arg::Uint(v) => v as i64,
            Arg::Char(c) => i64::from(u32::from(c)),
            Arg::Ptr(p) => p as i64,
            other => return Err(self.mismatch(ArgKind::Int, other)),
        };
        Ok(match self.length {
            Length::Char => i64::from(raw as i8),
            Length::Short => i64::from(raw as i16),
            Length::Default => i64::from(raw as i32),
            Length::Wide => raw,
        })
    }

    fn unsigned(&self, arg: Arg<'_>) -> Result<u64, FormatError> {
        let raw = match arg {
            Arg::Int(v) => v as u64,
            Arg::Uint(v) => v,
            Arg::Char(c) => u64::from(u32::from(c)),
            Arg::Ptr(p) => p as u64,
            other => return Err(self.mismatch(ArgKind::Uint, other)),
        };
        Ok(match self.length {
            Length::Char => u64::from(raw as u8),
            Length::Short => u64::from(raw as u16),
            Length::Default => u64::from(raw as u32),
            Length::Wide => raw,
        })
    }

    fn render<W: Write + ?Sized>(
        &self,
        out: &mut W,
        cursor: &mut Cursor<'_, '_>,
    ) -> Result<(), FormatError> {
        let mut flags = self.flags;
        let width = match self.width {
            None => 0,
            Some(Count::Fixed(n)) => n,
            Some(count) => {
                let w = self.star(count, cursor)?;
                if w < 0 {
                    flags.left = true;
                }
                w.unsigned_abs() as usize
            }
        };
        let precision = match self.precision {
            None => None,
            Some(Count::Fixed(n)) => Some(n),
            // A negative precision is taken as if it were omitted.
            Some(count) => usize::try_from(self.star(count, cursor)?).ok(),
        };
        let spec = Spec {
            flags,
            width,
            precision,
        };

        match self.conv {
            '%' => out.write_char('%')?,
            'm' => {
                let text = describe(last_os_error_code());
                pad(out, &spec, "", truncate(&text, precision), false)?;
            }
            'n' => {
                return Err(FormatError::Unsupported {
                    directive: self.text.to_string(),
                })
            }
            'd' | 'i' => {
                let v = self.signed(cursor.take(self.position, self.text)?)?;
                render_signed(out, &spec, v)?;
            }
            'u' | 'o' | 'x' | 'X' => {
                let v = self.unsigned(cursor.take(self.position, self.text)?)?;
                render_unsigned(out, &spec, v, self.conv)?;
            }
            'e' | 'E' | 'f' | 'F' | 'g' | 'G' | 'a' | 'A' => {
                let v = match cursor.take(self.position, self.text)? {
                    Arg::Float(v) => v,
                    Arg::Int(v) => v as f64,
                    Arg::Uint(v) => v as f64,
                    other => return Err(self.mismatch(ArgKind::Float, other)),
                };
                render_float(out, &spec, v, self.conv)?;
            }
            'c' | 'C' => {
                let c = match cursor.take(self.position, self.text)? {
                    Arg::Char(c) => c,
                    Arg::Int(v) => char::from(v as u8),
                    Arg::Uint(v) => char::from(v as u8),
                    other => return Err(self.mismatch(ArgKind::Char, other)),
                };
                let mut buf = [0u8; 4];
                pad(out, &spec, "", c.encode_utf8(&mut buf), false)?;
            }
            's' | 'S' => {
                let text = match cursor.take(self.position, self.text)? {
                    Arg::Str(s) => s,
                    Arg::Ptr(0) if precision.map_or(true, |p| p >= 6) => "(null)",
                    Arg::Ptr(0) => "",
                    other => return Err(self.mismatch(ArgKind::Str, other)),
                };
                pad(out, &spec, "", truncate(text, precision), false)?;
            }
            'p' => {
                let addr = match cursor.take(self.position, self.text)? {
                    Arg::Ptr(p) => p as u64,
                    Arg::Uint(v) => v,
                    Arg::Int(v) => v as u64,
                    other => return Err(self.mismatch(ArgKind::Ptr, other)),
                };
                if addr == 0 {
                    pad(out, &spec, "", "(nil)", false)?;
                } else {
                    pad(out, &spec, "0x", &format!("{addr:x}"), true)?;
                }
            }
            _ => out.write_str(self.text)?,
        }
        Ok(())
    }
}

struct Cursor<'b, 'a> {
    args: &'b [Arg<'a>],
    next: usize,
}

impl<'a> Cursor<'_, 'a> {
    fn take(&mut self, position: Option<usize>, directive: &str) -> Result<Arg<'a>, FormatError> {
        let index = match position {
            Some(p) => p,
            None => {
                self.next += 1;
                self.next
            }
        };
        index
            .checked_sub(1)
            .and_then(|i| self.args.get(i))
            .copied()
            .ok_or_else(|| FormatError::MissingArgument {
                directive: directive.to_string(),
                index,
            })
    }
}

fn pieces(format: &str) -> Vec<Piece<'_>> {
    let mut out = Vec::new();
    let mut last = 0;
    for caps in directive_re().captures_iter(format) {
        let Some(m) = caps.get(0) else { continue };
        if m.start() > last {
            out.push(Piece::Text(&format[last..m.start()]));
        }
        out.push(Piece::Directive(Directive::from_captures(&caps, m.as_str())));
        last = m.end();
    }
    if last < format.len() {
        out.push(Piece::Text(&format[last..]));
    }
    out
}

/// Render `format` with `args` into `out`.
///
/// Directives that do not parse are copied through literally and extra arguments are
/// ignored. A missing argument, an argument of the wrong kind, or `%n` is an error.
pub fn write_printf<W: Write + ?Sized>(
    out: &mut W,
    format: &str,
    args: &[Arg<'_>],
) -> Result<(), FormatError> {
    let mut cursor = Cursor { args, next: 0 };
    for piece in pieces(format) {
        match piece {
            Piece::Text(t) => out.write_str(t)?,
            Piece::Directive(d) => d.render(out, &mut cursor)?,
        }
    }
    Ok(())
}

/// Render `format` with `args` into a new string.
pub fn sprintf(format: &str, args: &[Arg<'_>]) -> Result<String, FormatError> {
    let mut s = String::with_capacity(format.len());
    write_printf(&mut s, format, args)?;
    Ok(s)
}

/// List the kinds of the arguments `format` consumes, in argument order.
///
/// `*` widths and precisions count as integers. Positions no directive refers to are
/// reported as integers.
pub fn expected_kinds(format: &str) -> Result<Vec<ArgKind>, FormatError> {
    let mut slots: Vec<Option<ArgKind>> = Vec::new();
    let mut next = 0;
    for piece in pieces(format) {
        let Piece::Directive(d) = piece else { continue };
        if d.conv == 'n' {
            return Err(FormatError::Unsupported {
                directive: d.text.to_string(),
            });
        }
        let counts = [d.width, d.precision].into_iter().flatten();
        let mut claims: Vec<(Option<usize>, ArgKind)> = counts
            .filter_map(|c| match c {
                Count::Fixed(_) => None,
                Count::Next => Some((None, ArgKind::Int)),
                Count::At(p) => Some((Some(p), ArgKind::Int)),
            })
            .collect();
        if let Some(kind) = d.value_kind() {
            claims.push((d.position, kind));
        }
        for (position, kind) in claims {
            let index = position.unwrap_or_else(|| {
                next += 1;
                next
            });
            if index > MAX_POSITION {
                return Err(FormatError::Unsupported {
                    directive: d.text.to_string(),
                });
            }
            if slots.len() < index {
                slots.resize(index, None);
            }
            slots[index - 1].get_or_insert(kind);
        }
    }
    Ok(slots
        .into_iter()
        .map(|s| s.unwrap_or(ArgKind::Int))
        .collect())
}

#[derive(Debug, Clone, Copy)]
struct Spec {
    flags: Flags,
    width: usize,
    precision: Option<usize>,
}

fn write_fill<W: Write + ?Sized>(out: &mut W, c: char, n: usize) -> fmt::Result {
    for _ in 0..n {
        out.write_char(c)?;
    }
    Ok(())
}

/// Write `prefix` (sign, radix marker) and `body` justified to the field width.
///
/// Widths count bytes, as in C. Zero fill goes between prefix and body.
fn pad<W: Write + ?Sized>(
    out: &mut W,
    spec: &Spec,
    prefix: &str,
    body: &str,
    zero_fill: bool,
) -> fmt::Result {
    let fill = spec.width.saturating_sub(prefix.len() + body.len());
    if spec.flags.left {
        out.write_str(prefix)?;
        out.write_str(body)?;
        write_fill(out, ' ', fill)
    } else if zero_fill && spec.flags.zero {
        out.write_str(prefix)?;
        write_fill(out, '0', fill)?;
        out.write_str(body)
    } else {
        write_fill(out, ' ', fill)?;
        out.write_str(prefix)?;
        out.write_str(body)
    }
}

fn truncate(s: &str, precision: Option<usize>) -> &str {
    match precision {
        Some(p) if p < s.len() => {
            let mut end = p;
            while !s.is_char_boundary(end) {
                end -= 1;
            }
            &s[..end]
        }
        _ => s,
    }
}

fn sign_for(negative: bool, flags: &Flags) -> &'static str {
    if negative {
        "-"
    } else if flags.plus {
        "+"
    } else if flags.space {
        " "
    } else {
        ""
    }
}

fn apply_int_precision(digits: String, is_zero: bool, precision: Option<usize>) -> String {
    match precision {
        Some(0) if is_zero => String::new(),
        Some(p) if digits.len() < p => "0".repeat(p - digits.len()) + &digits,
        _ => digits,
    }
}

fn render_signed<W: Write + ?Sized>(out: &mut W, spec: &Spec, value: i64) -> fmt::Result {
    let body = apply_int_precision(value.unsigned_abs().to_string(), value == 0, spec.precision);
    let sign = sign_for(value < 0, &spec.flags);
    pad(out, spec, sign, &body, spec.precision.is_none())
}

fn render_unsigned<W: Write + ?Sized>(
    out: &mut W,
    spec: &Spec,
    value: u64,
    conv: char,
) -> fmt::Result {
    let digits = match conv {
        'o' => format!("{value:o}"),
        'x' => format!("{value:x}"),
        'X' => format!("{value:X}"),
        _ => value.to_string(),
    };
    let mut body = apply_int_precision(digits, value == 0, spec.precision);
    let mut prefix = "";
    if spec.flags.alt {
        match conv {
            'o' if !body.starts_with('0') => body.insert(0, '0'),
            'x' if value != 0 => prefix = "0x",
            'X' if value != 0 => prefix = "0X",
            _ => {}
        }
    }
    pad(out, spec, prefix, &body, spec.precision.is_none())
}

fn render_float<W: Write + ?Sized>(
    out: &mut W,
    spec: &Spec,
    value: f64,
    conv: char,
) -> fmt::Result {
    let upper = conv.is_ascii_uppercase();
    let sign = sign_for(value.is_sign_negative(), &spec.flags);
    let magnitude = value.abs();
    if !value.is_finite() {
        let text = match (value.is_nan(), upper) {
            (true, false) => "nan",
            (true, true) => "NAN",
            (false, false) => "inf",
            (false, true) => "INF",
        };
        return pad(out, spec, sign, text, false);
    }
    let alt = spec.flags.alt;
    match conv.to_ascii_lowercase() {
        'f' => pad(out, spec, sign, &fixed(magnitude, spec.precision.unwrap_or(6), alt), true),
        'e' => {
            let body = exponential(magnitude, spec.precision.unwrap_or(6), alt, upper);
            pad(out, spec, sign, &body, true)
        }
        'g' => pad(out, spec, sign, &general(magnitude, spec.precision, alt, upper), true),
        _ => {
            let prefix = format!("{sign}{}", if upper { "0X" } else { "0x" });
            pad(out, spec, &prefix, &hex_float(magnitude, spec.precision, alt, upper), true)
        }
    }
}

fn fixed(v: f64, precision: usize, alt: bool) -> String {
    let mut s = format!("{v:.precision$}");
    if alt && precision == 0 {
        s.push('.');
    }
    s
}

/// Split Rust's `{:e}` rendering into mantissa and decimal exponent.
fn split_exponent(v: f64, precision: usize) -> (String, i32) {
    let s = format!("{v:.precision$e}");
    match s.split_once('e') {
        Some((mantissa, exp)) => (mantissa.to_string(), exp.parse().unwrap_or(0)),
        None => (s, 0),
    }
}

fn exponential(v: f64, precision: usize, alt: bool, upper: bool) -> String {
    let (mut s, exp) = split_exponent(v, precision);
    if alt && precision == 0 {
        s.push('.');
    }
    s.push(if upper { 'E' } else { 'e' });
    s.push(if exp < 0 { '-' } else { '+' });
    s.push_str(&format!("{:02}", exp.unsigned_abs()));
    s
}

fn general(v: f64, precision: Option<usize>, alt: bool, upper: bool) -> String {
    let p = match precision {
        Some(0) => 1,
        Some(p) => p,
        None => 6,
    };
    let x = if v == 0.0 { 0 } else { split_exponent(v, p - 1).1 };
    let body = if x < -4 || i64::from(x) >= p as i64 {
        exponential(v, p - 1, alt, upper)
    } else {
        fixed(v, (p as i64 - 1 - i64::from(x)) as usize, alt)
    };
    if alt {
        body
    } else {
        strip_trailing_zeros(&body)
    }
}

fn strip_trailing_zeros(s: &str) -> String {
    let (mantissa, exp) = match s.find(|c| c == 'e' || c == 'E') {
        Some(i) => s.split_at(i),
        None => (s, ""),
    };
    if !mantissa.contains('.') {
        return s.to_string();
    }
    let trimmed = mantissa.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed}{exp}")
}

fn hex_float(v: f64, precision: Option<usize>, alt: bool, upper: bool) -> String {
    const FRACTION_BITS: u32 = 52;
    const NIBBLES: usize = 13;

    let bits = v.to_bits();
    let biased = ((bits >> FRACTION_BITS) & 0x7ff) as i32;
    let fraction = bits & ((1u64 << FRACTION_BITS) - 1);
    let (mut lead, mut exp) = match (biased, fraction) {
        (0, 0) => (0u64, 0i32),
        (0, _) => (0, -1022),
        _ => (1, biased - 1023),
    };
    let mut digits = match precision {
        None => format!("{fraction:013x}").trim_end_matches('0').to_string(),
        Some(p) if p >= NIBBLES => format!("{fraction:013x}{}", "0".repeat(p - NIBBLES)),
        Some(p) => {
            let shift = (NIBBLES - p) * 4;
            let full = (lead << FRACTION_BITS) | fraction;
            let mut q = full >> shift;
            let rem = full & ((1u64 << shift) - 1);
            let half = 1u64 << (shift - 1);
            if rem > half || (rem == half && q & 1 == 1) {
                q += 1;
            }
            let kept = q & ((1u64 << (p * 4)) - 1);
            lead = q >> (p * 4);
            if lead > 1 {
                lead = 1;
                exp += 1;
            }
            if p == 0 {
                String::new()
            } else {
                format!("{kept:0p$x}")
            }
        }
    };
    if upper {
        digits.make_ascii_uppercase();
    }
    let mut s = lead.to_string();
    if !digits.is_empty() || alt {
        s.push('.');
    }
    s.push_str(&digits);
    s.push(if upper { 'P' } else { 'p' });
    s.push(if exp < 0 { '-' } else { '+' });
    s.push_str(&exp.unsigned_abs().to_string());
    s
}
