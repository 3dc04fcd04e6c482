// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Scalar numeric, comparison, and conversion operators, factored out of the
//! main dispatch loop so it stays readable.

use super::Trap;

pub(super) fn i32_div_s(a: i32, b: i32) -> Result<i32, Trap> {
    if b == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    if a == i32::MIN && b == -1 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(a / b)
}

pub(super) fn i32_rem_s(a: i32, b: i32) -> Result<i32, Trap> {
    if b == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    Ok(a.wrapping_rem(b))
}

pub(super) fn i64_div_s(a: i64, b: i64) -> Result<i64, Trap> {
    if b == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    if a == i64::MIN && b == -1 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(a / b)
}

pub(super) fn i64_rem_s(a: i64, b: i64) -> Result<i64, Trap> {
    if b == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    Ok(a.wrapping_rem(b))
}

pub(super) fn u32_div(a: u32, b: u32) -> Result<u32, Trap> {
    if b == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    Ok(a / b)
}

pub(super) fn u32_rem(a: u32, b: u32) -> Result<u32, Trap> {
    if b == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    Ok(a % b)
}

pub(super) fn u64_div(a: u64, b: u64) -> Result<u64, Trap> {
    if b == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    Ok(a / b)
}

pub(super) fn u64_rem(a: u64, b: u64) -> Result<u64, Trap> {
    if b == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    Ok(a % b)
}

// Trapping float-to-integer conversions ([wasm]: 5.4.7, `trunc`). The source
// is always widened to f64 first; widening f32 to f64 is exact, so the same
// bounds work for both source widths.
pub(super) fn trunc_to_i32(z: f64) -> Result<i32, Trap> {
    if z.is_nan() {
        return Err(Trap::InvalidConversionToInteger);
    }
    let t = z.trunc();
    if t < -2_147_483_648.0 || t >= 2_147_483_648.0 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(t as i32)
}

pub(super) fn trunc_to_u32(z: f64) -> Result<u32, Trap> {
    if z.is_nan() {
        return Err(Trap::InvalidConversionToInteger);
    }
    let t = z.trunc();
    if t <= -1.0 || t >= 4_294_967_296.0 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(t as u32)
}

pub(super) fn trunc_to_i64(z: f64) -> Result<i64, Trap> {
    if z.is_nan() {
        return Err(Trap::InvalidConversionToInteger);
    }
    let t = z.trunc();
    if t < -9_223_372_036_854_775_808.0 || t >= 9_223_372_036_854_775_808.0 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(t as i64)
}

pub(super) fn trunc_to_u64(z: f64) -> Result<u64, Trap> {
    if z.is_nan() {
        return Err(Trap::InvalidConversionToInteger);
    }
    let t = z.trunc();
    if t <= -1.0 || t >= 18_446_744_073_709_551_616.0 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(t as u64)
}

// Saturating float-to-integer conversions (the `trunc_sat` bulk opcodes):
// never trap, clamping NaN to zero and out-of-range magnitudes to the
// destination's extremes.
pub(super) fn trunc_sat_to_i32(z: f64) -> i32 {
    if z.is_nan() {
        0
    } else if z <= -2_147_483_648.0 {
        i32::MIN
    } else if z >= 2_147_483_648.0 {
        i32::MAX
    } else {
        z.trunc() as i32
    }
}

pub(super) fn trunc_sat_to_u32(z: f64) -> u32 {
    if z.is_nan() || z <= -1.0 {
        0
    } else if z >= 4_294_967_296.0 {
        u32::MAX
    } else {
        z.trunc() as u32
    }
}

pub(super) fn trunc_sat_to_i64(z: f64) -> i64 {
    if z.is_nan() {
        0
    } else if z <= -9_223_372_036_854_775_808.0 {
        i64::MIN
    } else if z >= 9_223_372_036_854_775_808.0 {
        i64::MAX
    } else {
        z.trunc() as i64
    }
}

pub(super) fn trunc_sat_to_u64(z: f64) -> u64 {
    if z.is_nan() || z <= -1.0 {
        0
    } else if z >= 18_446_744_073_709_551_616.0 {
        u64::MAX
    } else {
        z.trunc() as u64
    }
}
