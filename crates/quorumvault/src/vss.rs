//! threshold secret sharing using shamir's scheme over GF(256)
//!
//! every byte of the secret is the constant term of its own random
//! polynomial of degree `threshold - 1`. share `i` holds the evaluations of
//! all those polynomials at `x = i`. any `threshold` shares interpolate the
//! secret at `x = 0`; fewer reveal nothing about it.
//!
//! a hash tag of the secret is appended before splitting and checked after
//! interpolation. the tag is shared like the secret itself, so it only
//! becomes visible once a threshold is reached.

use std::collections::BTreeMap;

use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::crypto::{ct_eq, secret_tag, SECRET_TAG_LEN};
use crate::share::{Share, SPLIT_ID_LEN};
use crate::{Error, Result};

/// largest share count, bounded by the non-zero elements of GF(256)
pub const MAX_SHARES: usize = 255;

/// largest secret, so a share value still fits the u16 length prefix
pub const MAX_SECRET_LEN: usize = u16::MAX as usize - SECRET_TAG_LEN;

/// GF(256) multiplication using AES polynomial (x^8 + x^4 + x^3 + x + 1)
fn gf256_mul(a: u8, b: u8) -> u8 {
    let mut result = 0u8;
    let mut a = a;
    let mut b = b;

    while b != 0 {
        if b & 1 != 0 {
            result ^= a;
        }
        let hi = a & 0x80;
        a <<= 1;
        if hi != 0 {
            a ^= 0x1b;
        }
        b >>= 1;
    }
    result
}

/// GF(256) multiplicative inverse, a^254 = a^(-1)
fn gf256_inv(a: u8) -> u8 {
    if a == 0 {
        return 0;
    }
    let mut result = a;
    for _ in 0..6 {
        result = gf256_mul(result, result);
        result = gf256_mul(result, a);
    }
    gf256_mul(result, result)
}

fn gf256_div(a: u8, b: u8) -> u8 {
    gf256_mul(a, gf256_inv(b))
}

/// evaluate polynomial (lowest coefficient first) at x using horner's rule
fn poly_eval(coeffs: &[u8], x: u8) -> u8 {
    coeffs
        .iter()
        .rev()
        .fold(0u8, |acc, &c| gf256_mul(acc, x) ^ c)
}

/// lagrange interpolation of the points (xs[i], ys[i]) at `x`
///
/// subtraction is xor in GF(256), so (x - xj) is x ^ xj
fn interpolate_at(xs: &[u8], ys: &[u8], x: u8) -> u8 {
    let mut result = 0u8;

    for (i, (&xi, &yi)) in xs.iter().zip(ys.iter()).enumerate() {
        let mut num = 1u8;
        let mut den = 1u8;

        for (j, &xj) in xs.iter().enumerate() {
            if i != j {
                num = gf256_mul(num, x ^ xj);
                den = gf256_mul(den, xi ^ xj);
            }
        }

        result ^= gf256_mul(yi, gf256_div(num, den));
    }

    result
}

fn check_parameters(secret_len: usize, threshold: usize, total: usize) -> Result<()> {
    if secret_len == 0 {
        return Err(Error::InvalidParameters("secret is empty".into()));
    }
    if secret_len > MAX_SECRET_LEN {
        return Err(Error::InvalidParameters(format!(
            "secret of {} bytes exceeds {}",
            secret_len, MAX_SECRET_LEN
        )));
    }
    if threshold < 1 {
        return Err(Error::InvalidParameters("threshold must be at least 1".into()));
    }
    if threshold > total {
        return Err(Error::InvalidParameters(format!(
            "threshold {} exceeds share count {}",
            threshold, total
        )));
    }
    if total > MAX_SHARES {
        return Err(Error::InvalidParameters(format!(
            "share count {} exceeds {}",
            total, MAX_SHARES
        )));
    }
    Ok(())
}

/// split a secret into `total` shares, any `threshold` of which recover it
pub fn split(secret: &[u8], threshold: usize, total: usize) -> Result<Vec<Share>> {
    split_with_rng(secret, threshold, total, &mut rand::thread_rng())
}

/// split with a caller-supplied rng
pub fn split_with_rng<R: RngCore + CryptoRng>(
    secret: &[u8],
    threshold: usize,
    total: usize,
    rng: &mut R,
) -> Result<Vec<Share>> {
    check_parameters(secret.len(), threshold, total)?;

    let mut tagged = Zeroizing::new(Vec::with_capacity(secret.len() + SECRET_TAG_LEN));
    tagged.extend_from_slice(secret);
    tagged.extend_from_slice(&secret_tag(secret));

    let mut values: Vec<Zeroizing<Vec<u8>>> = (0..total)
        .map(|_| Zeroizing::new(vec![0u8; tagged.len()]))
        .collect();
    let mut coeffs = Zeroizing::new(vec![0u8; threshold]);

    for (i, &byte) in tagged.iter().enumerate() {
        coeffs[0] = byte;
        rng.fill_bytes(&mut coeffs[1..]);

        for (j, value) in values.iter_mut().enumerate() {
            value[i] = poly_eval(&coeffs, (j + 1) as u8);
        }
    }

    let mut split_id = [0u8; SPLIT_ID_LEN];
    rng.fill_bytes(&mut split_id);
    Ok(values
        .into_iter()
        .enumerate()
        .map(|(j, value)| {
            Share::new(
                (j + 1) as u8,
                value.to_vec(),
                threshold as u8,
                total as u8,
                split_id,
            )
        })
        .collect())
}

/// reconstruct the secret from at least `threshold` shares of one split
///
/// shares are deduplicated by index and the first `threshold` (by index)
/// are interpolated. surplus shares must lie on the same polynomials and
/// the interpolated tag must match the interpolated secret.
pub fn combine(shares: &[Share], threshold: usize) -> Result<Zeroizing<Vec<u8>>> {
    if threshold < 1 || threshold > MAX_SHARES {
        return Err(Error::InvalidParameters(format!(
            "threshold {} out of range",
            threshold
        )));
    }

    let mut distinct: BTreeMap<u8, &Share> = BTreeMap::new();
    for share in shares {
        share.verify()?;
        if let Some(seen) = distinct.get(&share.index) {
            if !ct_eq(&seen.value, &share.value) {
                return Err(Error::InconsistentShares {
                    suspect: Some(share.index),
                });
            }
            continue;
        }
        distinct.insert(share.index, share);
    }

    if distinct.len() < threshold {
        return Err(Error::InsufficientShares {
            have: distinct.len(),
            need: threshold,
        });
    }

    // every share must come from the same threshold-split
    let reference = match distinct.values().next() {
        Some(share) => *share,
        None => unreachable!("threshold is at least 1"),
    };
    for share in distinct.values() {
        if share.threshold as usize != threshold
            || share.total != reference.total
            || share.split_id != reference.split_id
            || share.value.len() != reference.value.len()
            || share.value.len() <= SECRET_TAG_LEN
            || share.index == 0
            || share.index > share.total
        {
            return Err(Error::InconsistentShares {
                suspect: Some(share.index),
            });
        }
    }

    let (base, surplus): (Vec<&Share>, Vec<&Share>) = {
        let all: Vec<&Share> = distinct.values().copied().collect();
        let (b, s) = all.split_at(threshold);
        (b.to_vec(), s.to_vec())
    };

    let len = reference.value.len();
    let xs: Vec<u8> = base.iter().map(|s| s.index).collect();
    let mut ys = Zeroizing::new(vec![0u8; threshold]);
    let mut tagged = Zeroizing::new(vec![0u8; len]);
    let mut off_curve: Option<u8> = None;

    for i in 0..len {
        for (y, share) in ys.iter_mut().zip(base.iter()) {
            *y = share.value[i];
        }
        tagged[i] = interpolate_at(&xs, &ys, 0);

        for share in &surplus {
            if off_curve.is_none() && interpolate_at(&xs, &ys, share.index) != share.value[i] {
                off_curve = Some(share.index);
            }
        }
    }

    let (secret, tag) = tagged.split_at(len - SECRET_TAG_LEN);
    if !ct_eq(&secret_tag(secret), tag) {
        return Err(Error::InconsistentShares { suspect: off_curve });
    }
    if let Some(index) = off_curve {
        return Err(Error::InconsistentShares {
            suspect: Some(index),
        });
    }

    Ok(Zeroizing::new(secret.to_vec()))
}
