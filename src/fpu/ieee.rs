//! IEEE-754 arithmetic with software exception flags and directed rounding,
//! computed on `rustc_apfloat` so results never depend on the host FPU.
//!
//! Values cross the API as `f32`/`f64` bit containers only. No host
//! floating-point arithmetic is performed on them.

use std::cmp::Ordering;

use rustc_apfloat::ieee::{Double, Single};
use rustc_apfloat::{Float, FloatConvert, Round, Status, StatusAnd};

/// Exception bits as they appear in FSR.cexc / aexc / TEM.
pub mod exc {
    pub const NV: u32 = 0x10;
    pub const OF: u32 = 0x08;
    pub const UF: u32 = 0x04;
    pub const DZ: u32 = 0x02;
    pub const NX: u32 = 0x01;
}

/// SPARC default NaNs.
pub const DEFAULT_NAN_S: u32 = 0x7fff_ffff;
pub const DEFAULT_NAN_D: u64 = 0x7fff_ffff_ffff_ffff;

const QUIET_S: u32 = 1 << 22;
const QUIET_D: u64 = 1 << 51;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rounding {
    #[default]
    Nearest,
    Zero,
    PosInf,
    NegInf,
}

impl Rounding {
    /// Decodes FSR.RD.
    pub fn from_fsr(fsr: u32) -> Self {
        match fsr >> 30 {
            0 => Rounding::Nearest,
            1 => Rounding::Zero,
            2 => Rounding::PosInf,
            _ => Rounding::NegInf,
        }
    }
}

impl From<Rounding> for Round {
    fn from(rd: Rounding) -> Self {
        match rd {
            Rounding::Nearest => Round::NearestTiesToEven,
            Rounding::Zero => Round::TowardZero,
            Rounding::PosInf => Round::TowardPositive,
            Rounding::NegInf => Round::TowardNegative,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// A result plus the exceptions raised computing it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rounded<T> {
    pub value: T,
    pub exc: u32,
}

impl<T> Rounded<T> {
    fn new(value: T, exc: u32) -> Self {
        Self { value, exc }
    }
}

fn single(x: f32) -> Single {
    Single::from_bits(x.to_bits() as u128)
}

fn double(x: f64) -> Double {
    Double::from_bits(x.to_bits() as u128)
}

fn to_f32(x: Single) -> f32 {
    f32::from_bits(x.to_bits() as u32)
}

fn to_f64(x: Double) -> f64 {
    f64::from_bits(x.to_bits() as u64)
}

/// Maps apfloat status bits to FSR exception bits.
fn flags(status: Status) -> u32 {
    [
        (Status::INVALID_OP, exc::NV),
        (Status::DIV_BY_ZERO, exc::DZ),
        (Status::OVERFLOW, exc::OF),
        (Status::UNDERFLOW, exc::UF),
        (Status::INEXACT, exc::NX),
    ]
    .into_iter()
    .filter(|&(s, _)| status.contains(s))
    .fold(0, |m, (_, e)| m | e)
}

fn arith<F: Float>(op: BinOp, a: F, b: F, rd: Rounding) -> StatusAnd<F> {
    let round = Round::from(rd);
    match op {
        BinOp::Add => a.add_r(b, round),
        BinOp::Sub => a.sub_r(b, round),
        BinOp::Mul => a.mul_r(b, round),
        BinOp::Div => a.div_r(b, round),
    }
}

pub fn binary_d(op: BinOp, a: f64, b: f64, rd: Rounding) -> Rounded<f64> {
    let (x, y) = (double(a), double(b));
    let StatusAnd { status, value } = arith(op, x, y, rd);
    // Invalid operations on numbers produce the SPARC default NaN.
    if value.is_nan() && !x.is_nan() && !y.is_nan() {
        return Rounded::new(f64::from_bits(DEFAULT_NAN_D), flags(status));
    }
    Rounded::new(to_f64(value), flags(status))
}

pub fn binary_s(op: BinOp, a: f32, b: f32, rd: Rounding) -> Rounded<f32> {
    let (x, y) = (single(a), single(b));
    let StatusAnd { status, value } = arith(op, x, y, rd);
    if value.is_nan() && !x.is_nan() && !y.is_nan() {
        return Rounded::new(f32::from_bits(DEFAULT_NAN_S), flags(status));
    }
    Rounded::new(to_f32(value), flags(status))
}

/// Integer square root of `m * 2^e` scaled to 63 significant bits, with bit 0
/// acting as the sticky bit. Returns the root and the power of two it carries.
fn sqrt_parts(m: u64, e: i32) -> (u128, i32) {
    let width = 64 - m.leading_zeros() as i32;
    let mut shift = 126 - width;
    if (e - shift) % 2 != 0 {
        shift -= 1;
    }
    let wide = (m as u128) << shift;
    let q = wide.isqrt();
    let sticky = (q * q != wide) as u128;
    (q | sticky, (e - shift) / 2)
}

/// Square root of a positive, finite, non-zero `m * 2^e`, rounded once.
fn sqrt_finite<F: Float>(m: u64, e: i32, rd: Rounding) -> StatusAnd<F> {
    let (q, scale) = sqrt_parts(m, e);
    let StatusAnd { status, value } = F::from_u128_r(q, Round::from(rd));
    // The root of any finite value is a normal number, so scaling is exact.
    StatusAnd { status, value: value.scalbn(scale) }
}

pub fn sqrt_d(a: f64, rd: Rounding) -> Rounded<f64> {
    let x = double(a);
    if x.is_nan() {
        let nv = if x.is_signaling() { exc::NV } else { 0 };
        return Rounded::new(f64::from_bits(a.to_bits() | QUIET_D), nv);
    }
    if x.is_zero() || (x.is_infinite() && !x.is_negative()) {
        return Rounded::new(a, 0);
    }
    if x.is_negative() {
        return Rounded::new(f64::from_bits(DEFAULT_NAN_D), exc::NV);
    }
    let bits = a.to_bits();
    let (biased, frac) = ((bits >> 52) as i32, bits & ((1 << 52) - 1));
    let (m, e) = if biased == 0 { (frac, -1074) } else { (frac | 1 << 52, biased - 1075) };
    let StatusAnd { status, value } = sqrt_finite::<Double>(m, e, rd);
    Rounded::new(to_f64(value), flags(status))
}

pub fn sqrt_s(a: f32, rd: Rounding) -> Rounded<f32> {
    let x = single(a);
    if x.is_nan() {
        let nv = if x.is_signaling() { exc::NV } else { 0 };
        return Rounded::new(f32::from_bits(a.to_bits() | QUIET_S), nv);
    }
    if x.is_zero() || (x.is_infinite() && !x.is_negative()) {
        return Rounded::new(a, 0);
    }
    if x.is_negative() {
        return Rounded::new(f32::from_bits(DEFAULT_NAN_S), exc::NV);
    }
    let bits = a.to_bits();
    let (biased, frac) = ((bits >> 23) as i32, (bits & ((1 << 23) - 1)) as u64);
    let (m, e) = if biased == 0 { (frac, -149) } else { (frac | 1 << 23, biased - 150) };
    let StatusAnd { status, value } = sqrt_finite::<Single>(m, e, rd);
    Rounded::new(to_f32(value), flags(status))
}

pub fn int_to_s(i: i32, rd: Rounding) -> Rounded<f32> {
    let StatusAnd { status, value } = Single::from_i128_r(i as i128, Round::from(rd));
    Rounded::new(to_f32(value), flags(status))
}

pub fn int_to_d(i: i32) -> Rounded<f64> {
    let StatusAnd { status, value } = Double::from_i128_r(i as i128, Round::NearestTiesToEven);
    Rounded::new(to_f64(value), flags(status))
}

/// Format conversion. A NaN is quieted and only a signalling one raises NV.
fn convert<S, D>(x: S, rd: Rounding) -> (D, u32)
where
    S: Float + FloatConvert<D>,
    D: Float,
{
    let mut loses_info = false;
    let StatusAnd { status, value } = x.convert_r(Round::from(rd), &mut loses_info);
    if x.is_nan() {
        let nv = if x.is_signaling() { exc::NV } else { 0 };
        return (value, nv);
    }
    (value, flags(status))
}

pub fn s_to_d(a: f32) -> Rounded<f64> {
    let (value, e): (Double, u32) = convert(single(a), Rounding::Nearest);
    let bits = to_f64(value).to_bits();
    let bits = if value.is_nan() { bits | QUIET_D } else { bits };
    Rounded::new(f64::from_bits(bits), e)
}

pub fn d_to_s(a: f64, rd: Rounding) -> Rounded<f32> {
    let (value, e): (Single, u32) = convert(double(a), rd);
    let bits = to_f32(value).to_bits();
    let bits = if value.is_nan() { bits | QUIET_S } else { bits };
    Rounded::new(f32::from_bits(bits), e)
}

/// Conversion to a 32-bit integer, rounding toward zero. NaN and out-of-range
/// values raise NV and saturate.
fn to_int<F: Float>(x: F) -> Rounded<i32> {
    if x.is_nan() {
        return Rounded::new(i32::MAX, exc::NV);
    }
    let mut exact = false;
    let StatusAnd { status, value } = x.to_i128_r(32, Round::TowardZero, &mut exact);
    if status.contains(Status::INVALID_OP) {
        let sat = if x.is_negative() { i32::MIN } else { i32::MAX };
        return Rounded::new(sat, exc::NV);
    }
    Rounded::new(value as i32, flags(status))
}

pub fn to_int_s(a: f32) -> Rounded<i32> {
    to_int(single(a))
}

pub fn to_int_d(a: f64) -> Rounded<i32> {
    to_int(double(a))
}

/// Compare for FCMP/FCMPE: fcc 0 equal, 1 less, 2 greater, 3 unordered.
fn compare<F: Float>(a: F, b: F, signal_unordered: bool) -> Rounded<u32> {
    match a.partial_cmp(&b) {
        Some(Ordering::Less) => Rounded::new(1, 0),
        Some(Ordering::Greater) => Rounded::new(2, 0),
        Some(Ordering::Equal) => Rounded::new(0, 0),
        None => {
            let nv = signal_unordered || a.is_signaling() || b.is_signaling();
            Rounded::new(3, if nv { exc::NV } else { 0 })
        }
    }
}

pub fn compare_s(a: f32, b: f32, signal_unordered: bool) -> Rounded<u32> {
    compare(single(a), single(b), signal_unordered)
}

pub fn compare_d(a: f64, b: f64, signal_unordered: bool) -> Rounded<u32> {
    compare(double(a), double(b), signal_unordered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_sum_has_no_flags() {
        assert_eq!(binary_d(BinOp::Add, 1.5, 2.25, Rounding::Nearest), Rounded::new(3.75, 0));
    }

    #[test]
    fn inexact_sum_and_directed_rounding() {
        let a = 1.0;
        let b = f64::EPSILON / 4.0;
        let near = binary_d(BinOp::Add, a, b, Rounding::Nearest);
        assert_eq!(near, Rounded::new(1.0, exc::NX));
        let up = binary_d(BinOp::Add, a, b, Rounding::PosInf);
        assert_eq!(up.value, 1.0 + f64::EPSILON);
        let down = binary_d(BinOp::Sub, a, b, Rounding::NegInf);
        assert!(down.value < 1.0);
        let zero = binary_d(BinOp::Sub, a, b, Rounding::Zero);
        assert_eq!(zero.value, down.value);
    }

    #[test]
    fn third_is_inexact_in_single() {
        let r = binary_s(BinOp::Div, 1.0, 3.0, Rounding::Nearest);
        assert_eq!(r.value, 1.0f32 / 3.0);
        assert_eq!(r.exc, exc::NX);
        let up = binary_s(BinOp::Div, 1.0, 3.0, Rounding::PosInf);
        assert_eq!(up.value.to_bits(), r.value.to_bits() + 1);
    }

    #[test]
    fn invalid_and_divide_by_zero() {
        let r = binary_d(BinOp::Sub, f64::INFINITY, f64::INFINITY, Rounding::Nearest);
        assert_eq!(r.exc, exc::NV);
        assert_eq!(r.value.to_bits(), DEFAULT_NAN_D);
        let r = binary_s(BinOp::Div, 1.0, 0.0, Rounding::Nearest);
        assert_eq!(r, Rounded::new(f32::INFINITY, exc::DZ));
        let r = sqrt_s(-1.0, Rounding::Nearest);
        assert_eq!(r.exc, exc::NV);
        assert_eq!(r.value.to_bits(), DEFAULT_NAN_S);
    }

    #[test]
    fn overflow_respects_rounding_mode() {
        let r = binary_s(BinOp::Mul, f32::MAX, 2.0, Rounding::Nearest);
        assert_eq!(r, Rounded::new(f32::INFINITY, exc::OF | exc::NX));
        let r = binary_s(BinOp::Mul, f32::MAX, 2.0, Rounding::Zero);
        assert_eq!(r.value, f32::MAX);
    }

    #[test]
    fn underflow_needs_inexact() {
        let tiny = f64::MIN_POSITIVE;
        let r = binary_d(BinOp::Mul, tiny, 0.5, Rounding::Nearest);
        assert_eq!(r.exc, 0);
        let r = binary_d(BinOp::Div, tiny, 3.0, Rounding::Nearest);
        assert_eq!(r.exc, exc::UF | exc::NX);
    }

    #[test]
    fn product_below_smallest_subnormal() {
        let r = binary_d(BinOp::Mul, 1e-200, 1e-200, Rounding::Nearest);
        assert_eq!(r.value.to_bits(), 0);
        assert_eq!(r.exc, exc::UF | exc::NX);
        let up = binary_d(BinOp::Mul, 1e-200, 1e-200, Rounding::PosInf);
        assert_eq!(up.value.to_bits(), 1);
        assert_eq!(up.exc, exc::UF | exc::NX);
        let down = binary_d(BinOp::Mul, -1e-200, 1e-200, Rounding::NegInf);
        assert_eq!(down.value.to_bits(), 0x8000_0000_0000_0001);

        let s = binary_s(BinOp::Mul, 1e-30, 1e-30, Rounding::PosInf);
        assert_eq!(s, Rounded::new(f32::from_bits(1), exc::UF | exc::NX));
    }

    #[test]
    fn square_roots_round_once() {
        assert_eq!(sqrt_d(4.0, Rounding::Nearest), Rounded::new(2.0, 0));
        assert_eq!(sqrt_s(0.25, Rounding::Nearest), Rounded::new(0.5, 0));
        let near = sqrt_d(2.0, Rounding::Nearest);
        assert_eq!(near.value.to_bits(), 0x3ff6_a09e_667f_3bcd);
        assert_eq!(near.exc, exc::NX);
        let down = sqrt_d(2.0, Rounding::Zero);
        let up = sqrt_d(2.0, Rounding::PosInf);
        assert_eq!(down.value.to_bits(), 0x3ff6_a09e_667f_3bcc);
        assert_eq!(up.value.to_bits(), 0x3ff6_a09e_667f_3bcd);
        // Smallest subnormal: 2^-1074 has root 2^-537.
        let r = sqrt_d(f64::from_bits(1), Rounding::Nearest);
        assert_eq!(r, Rounded::new(f64::from_bits((1023 - 537) << 52), 0));
        assert_eq!(sqrt_d(-0.0, Rounding::Nearest).value.to_bits(), 0x8000_0000_0000_0000);
    }

    #[test]
    fn conversions_report_rounding() {
        assert_eq!(int_to_s(16_777_217, Rounding::Nearest), Rounded::new(16_777_216.0, exc::NX));
        assert_eq!(int_to_s(16_777_217, Rounding::PosInf).value, 16_777_218.0);
        assert_eq!(int_to_d(-7), Rounded::new(-7.0, 0));
        assert_eq!(d_to_s(0.1, Rounding::Nearest).exc, exc::NX);
        assert_eq!(d_to_s(1e300, Rounding::Nearest), Rounded::new(f32::INFINITY, exc::OF | exc::NX));
        assert_eq!(s_to_d(1.5), Rounded::new(1.5, 0));
        let snan = f32::from_bits(0x7f80_0001);
        let r = s_to_d(snan);
        assert_eq!(r.exc, exc::NV);
        assert!(r.value.is_nan());
        assert_ne!(r.value.to_bits() & QUIET_D, 0);
    }

    #[test]
    fn float_to_int_truncates_and_saturates() {
        assert_eq!(to_int_d(-2.75), Rounded::new(-2, exc::NX));
        assert_eq!(to_int_d(1e12), Rounded::new(i32::MAX, exc::NV));
        assert_eq!(to_int_d(-1e12), Rounded::new(i32::MIN, exc::NV));
        assert_eq!(to_int_d(-2147483648.0), Rounded::new(i32::MIN, 0));
        assert_eq!(to_int_s(f32::NAN).exc, exc::NV);
    }

    #[test]
    fn signalling_nan_compare() {
        let snan = f32::from_bits(0x7f80_0001);
        assert_eq!(compare_s(snan, 1.0, false), Rounded::new(3, exc::NV));
        assert_eq!(compare_s(f32::NAN, 1.0, false), Rounded::new(3, 0));
        assert_eq!(compare_s(f32::NAN, 1.0, true).exc, exc::NV);
        assert_eq!(compare_d(1.0, 2.0, true), Rounded::new(1, 0));
        assert_eq!(compare_d(-0.0, 0.0, false), Rounded::new(0, 0));
    }
}
