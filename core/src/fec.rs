//! Reed-Solomon(255,223) over GF(2^8).
//!
//! Field: primitive polynomial x^8+x^4+x^3+x^2+1 (0x11D), generator
//! element alpha = 2, code roots alpha^0..alpha^31. Decoding runs syndromes,
//! Berlekamp-Massey, Chien search, and Forney's formula, then re-checks the
//! syndromes of the repaired block. Up to 16 byte errors per block are
//! corrected; anything beyond is `UncorrectableFec`.

use crate::error::{Result, SonicLinkError};

pub const BLOCK_LEN: usize = 255;
pub const DATA_LEN: usize = 223;
pub const PARITY_LEN: usize = 32;

/// Number of RS blocks covering `len` input bytes.
pub fn block_count(len: usize) -> usize {
    len.div_ceil(DATA_LEN).max(1)
}

struct Gf256 {
    exp: [u8; 512],
    log: [u8; 256],
}

impl Gf256 {
    fn new() -> Self {
        let mut exp = [0u8; 512];
        let mut log = [0u8; 256];
        let mut x: u16 = 1;
        for i in 0..255 {
            exp[i] = x as u8;
            log[x as usize] = i as u8;
            x <<= 1;
            if x & 0x100 != 0 {
                x ^= 0x11D;
            }
        }
        for i in 255..512 {
            exp[i] = exp[i - 255];
        }
        Self { exp, log }
    }

    #[inline]
    fn mul(&self, a: u8, b: u8) -> u8 {
        if a == 0 || b == 0 {
            0
        } else {
            self.exp[self.log[a as usize] as usize + self.log[b as usize] as usize]
        }
    }

    /// a / b with b != 0.
    #[inline]
    fn div(&self, a: u8, b: u8) -> u8 {
        if a == 0 {
            0
        } else {
            self.exp[(self.log[a as usize] as usize + 255 - self.log[b as usize] as usize) % 255]
        }
    }

    /// alpha^e for any exponent.
    #[inline]
    fn alpha_pow(&self, e: usize) -> u8 {
        self.exp[e % 255]
    }

    /// x^-1 with x != 0.
    #[inline]
    fn inv(&self, x: u8) -> u8 {
        self.exp[255 - self.log[x as usize] as usize]
    }

    /// x^k with x != 0.
    #[inline]
    fn pow(&self, x: u8, k: usize) -> u8 {
        self.exp[(self.log[x as usize] as usize * k) % 255]
    }
}

pub struct RsCodec {
    gf: Gf256,
    /// Generator polynomial, descending powers, monic (gen[0] = 1).
    gen: [u8; PARITY_LEN + 1],
}

impl RsCodec {
    pub fn new() -> Self {
        let gf = Gf256::new();
        let mut gen = vec![1u8];
        for i in 0..PARITY_LEN {
            // gen *= (x + alpha^i)
            let root = gf.alpha_pow(i);
            let mut next = vec![0u8; gen.len() + 1];
            for (j, &g) in gen.iter().enumerate() {
                next[j] ^= g;
                next[j + 1] ^= gf.mul(g, root);
            }
            gen = next;
        }
        let mut arr = [0u8; PARITY_LEN + 1];
        arr.copy_from_slice(&gen);
        Self { gf, gen: arr }
    }

    /// Encode up to 223 data bytes (zero-padded) into a 255-byte codeword.
    pub fn encode_block(&self, data: &[u8]) -> [u8; BLOCK_LEN] {
        debug_assert!(data.len() <= DATA_LEN);
        let mut block = [0u8; BLOCK_LEN];
        block[..data.len()].copy_from_slice(data);

        // Synthetic division of data(x) * x^32 by the generator.
        let mut work = block;
        for i in 0..DATA_LEN {
            let coef = work[i];
            if coef != 0 {
                for j in 1..=PARITY_LEN {
                    work[i + j] ^= self.gf.mul(self.gen[j], coef);
                }
            }
        }
        block[DATA_LEN..].copy_from_slice(&work[DATA_LEN..]);
        block
    }

    /// Correct a 255-byte block in place.
    pub fn decode_block(&self, block: &mut [u8; BLOCK_LEN]) -> Result<()> {
        let synd = self.syndromes(block);
        if synd.iter().all(|&s| s == 0) {
            return Ok(());
        }

        let lambda = self.berlekamp_massey(&synd);
        let errors = lambda.len() - 1;
        if errors == 0 || errors > PARITY_LEN / 2 {
            return Err(SonicLinkError::UncorrectableFec);
        }

        let positions = self.chien_search(&lambda);
        if positions.len() != errors {
            return Err(SonicLinkError::UncorrectableFec);
        }

        self.forney(block, &synd, &lambda, &positions)?;

        // A miscorrection past the budget must never escape silently.
        let check = self.syndromes(block);
        if check.iter().any(|&s| s != 0) {
            return Err(SonicLinkError::UncorrectableFec);
        }
        Ok(())
    }

    /// Block-by-block encode of an arbitrary byte stream; short final blocks
    /// are zero-padded to 223 bytes.
    pub fn encode_stream(&self, data: &[u8]) -> Vec<u8> {
        let blocks = block_count(data.len());
        let mut out = Vec::with_capacity(blocks * BLOCK_LEN);
        if data.is_empty() {
            out.extend_from_slice(&self.encode_block(&[]));
            return out;
        }
        for chunk in data.chunks(DATA_LEN) {
            out.extend_from_slice(&self.encode_block(chunk));
        }
        out
    }

    /// Decode a stream of whole codewords back to `data_len` bytes.
    pub fn decode_stream(&self, coded: &[u8], data_len: usize) -> Result<Vec<u8>> {
        if coded.len() % BLOCK_LEN != 0 || coded.len() / BLOCK_LEN < block_count(data_len) {
            return Err(SonicLinkError::InvalidFrame(
                "coded region is not whole Reed-Solomon blocks".to_string(),
            ));
        }
        let mut out = Vec::with_capacity(coded.len() / BLOCK_LEN * DATA_LEN);
        for chunk in coded.chunks(BLOCK_LEN) {
            let mut block = [0u8; BLOCK_LEN];
            block.copy_from_slice(chunk);
            self.decode_block(&mut block)?;
            out.extend_from_slice(&block[..DATA_LEN]);
        }
        out.truncate(data_len);
        Ok(out)
    }

    /// S_j = r(alpha^j) for j in 0..32, Horner over the received polynomial.
    fn syndromes(&self, block: &[u8; BLOCK_LEN]) -> [u8; PARITY_LEN] {
        let mut synd = [0u8; PARITY_LEN];
        for (j, s) in synd.iter_mut().enumerate() {
            let a = self.gf.alpha_pow(j);
            let mut acc = 0u8;
            for &b in block.iter() {
                acc = self.gf.mul(acc, a) ^ b;
            }
            *s = acc;
        }
        synd
    }

    /// Error locator polynomial, ascending coefficients, lambda[0] = 1.
    fn berlekamp_massey(&self, synd: &[u8; PARITY_LEN]) -> Vec<u8> {
        let mut lambda = vec![1u8];
        let mut prev = vec![1u8];
        let mut l = 0usize;
        let mut m = 1usize;
        let mut prev_delta = 1u8;

        for n in 0..PARITY_LEN {
            let mut delta = synd[n];
            for i in 1..=l.min(lambda.len() - 1) {
                delta ^= self.gf.mul(lambda[i], synd[n - i]);
            }
            if delta == 0 {
                m += 1;
                continue;
            }
            let coef = self.gf.div(delta, prev_delta);
            let mut update = vec![0u8; m];
            update.extend(prev.iter().map(|&c| self.gf.mul(coef, c)));
            if 2 * l <= n {
                let keep = lambda.clone();
                lambda = poly_add(&lambda, &update);
                l = n + 1 - l;
                prev = keep;
                prev_delta = delta;
                m = 1;
            } else {
                lambda = poly_add(&lambda, &update);
                m += 1;
            }
        }

        while lambda.len() > 1 && *lambda.last().expect("nonempty") == 0 {
            lambda.pop();
        }
        lambda
    }

    /// Byte positions whose locator roots lie on the codeword.
    fn chien_search(&self, lambda: &[u8]) -> Vec<usize> {
        let mut positions = Vec::new();
        for e in 0..BLOCK_LEN {
            // Evaluate lambda at alpha^-e.
            let x = self.gf.exp[(255 - e % 255) % 255];
            let mut v = 0u8;
            for &c in lambda.iter().rev() {
                v = self.gf.mul(v, x) ^ c;
            }
            if v == 0 {
                positions.push(BLOCK_LEN - 1 - e);
            }
        }
        positions
    }

    /// Apply error magnitudes at the located positions.
    fn forney(
        &self,
        block: &mut [u8; BLOCK_LEN],
        synd: &[u8; PARITY_LEN],
        lambda: &[u8],
        positions: &[usize],
    ) -> Result<()> {
        // Omega(x) = S(x) * Lambda(x) mod x^32, ascending coefficients.
        let mut omega = [0u8; PARITY_LEN];
        for (i, &li) in lambda.iter().enumerate() {
            if li == 0 {
                continue;
            }
            for (j, &sj) in synd.iter().enumerate() {
                if i + j < PARITY_LEN {
                    omega[i + j] ^= self.gf.mul(li, sj);
                }
            }
        }

        for &pos in positions {
            let e = BLOCK_LEN - 1 - pos;
            let x = self.gf.alpha_pow(e);
            let x_inv = self.gf.inv(x);

            let mut num = 0u8;
            for &c in omega.iter().rev() {
                num = self.gf.mul(num, x_inv) ^ c;
            }

            // Formal derivative keeps odd-power terms only.
            let mut den = 0u8;
            let mut i = 1;
            while i < lambda.len() {
                den ^= self.gf.mul(lambda[i], self.gf.pow(x_inv, i - 1));
                i += 2;
            }
            if den == 0 {
                return Err(SonicLinkError::UncorrectableFec);
            }

            let magnitude = self.gf.mul(x, self.gf.div(num, den));
            block[pos] ^= magnitude;
        }
        Ok(())
    }
}

impl Default for RsCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn poly_add(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; a.len().max(b.len())];
    for (i, &v) in a.iter().enumerate() {
        out[i] ^= v;
    }
    for (i, &v) in b.iter().enumerate() {
        out[i] ^= v;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> RsCodec {
        RsCodec::new()
    }

    #[test]
    fn clean_block_roundtrip() {
        let rs = codec();
        let data: Vec<u8> = (0..DATA_LEN).map(|i| (i * 7 + 3) as u8).collect();
        let block = rs.encode_block(&data);
        let mut received = block;
        rs.decode_block(&mut received).unwrap();
        assert_eq!(&received[..DATA_LEN], &data[..]);
    }

    #[test]
    fn zero_data_has_zero_parity() {
        let rs = codec();
        let block = rs.encode_block(&[0u8; DATA_LEN]);
        assert_eq!(block, [0u8; BLOCK_LEN]);
    }

    #[test]
    fn corrects_up_to_sixteen_errors() {
        let rs = codec();
        let data: Vec<u8> = (0..DATA_LEN).map(|i| (i * 31 + 11) as u8).collect();
        let block = rs.encode_block(&data);

        for n_errors in [1usize, 2, 8, 15, 16] {
            let mut corrupted = block;
            for k in 0..n_errors {
                // Scatter positions across data and parity.
                let pos = (k * 97 + 5) % BLOCK_LEN;
                corrupted[pos] ^= (k as u8).wrapping_mul(51).wrapping_add(1);
            }
            rs.decode_block(&mut corrupted)
                .unwrap_or_else(|_| panic!("{n_errors} errors should correct"));
            assert_eq!(&corrupted[..DATA_LEN], &data[..], "n_errors={n_errors}");
        }
    }

    #[test]
    fn seventeen_errors_never_return_bad_data() {
        let rs = codec();
        let data: Vec<u8> = (0..DATA_LEN).map(|i| (i * 13 + 1) as u8).collect();
        let block = rs.encode_block(&data);

        let mut corrupted = block;
        for k in 0..17 {
            let pos = (k * 37 + 2) % BLOCK_LEN;
            corrupted[pos] ^= 0xA5;
        }
        match rs.decode_block(&mut corrupted) {
            Err(SonicLinkError::UncorrectableFec) => {}
            Ok(()) => assert_eq!(&corrupted[..DATA_LEN], &data[..]),
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn burst_of_twenty_is_uncorrectable() {
        let rs = codec();
        let data: Vec<u8> = (0..DATA_LEN).map(|i| (i * 5 + 9) as u8).collect();
        let block = rs.encode_block(&data);

        let mut corrupted = block;
        for pos in 40..60 {
            corrupted[pos] ^= 0xFF;
        }
        assert!(matches!(
            rs.decode_block(&mut corrupted),
            Err(SonicLinkError::UncorrectableFec)
        ));
    }

    #[test]
    fn stream_roundtrip_with_padding() {
        let rs = codec();
        for len in [0usize, 1, 5, 222, 223, 224, 500, 1000] {
            let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let coded = rs.encode_stream(&data);
            assert_eq!(coded.len(), block_count(len) * BLOCK_LEN);
            let decoded = rs.decode_stream(&coded, len).unwrap();
            assert_eq!(decoded, data, "len={len}");
        }
    }

    #[test]
    fn stream_corrects_scattered_errors() {
        let rs = codec();
        let data: Vec<u8> = (0..500).map(|i| (i % 256) as u8).collect();
        let mut coded = rs.encode_stream(&data);
        // Ten errors spread over the three codewords.
        for k in 0..10 {
            let pos = (k * 131 + 17) % coded.len();
            coded[pos] ^= 0x5A;
        }
        assert_eq!(rs.decode_stream(&coded, 500).unwrap(), data);
    }
}
