//! Premultiplied src-over Blend Kernel
//!
//! Composites one row of premultiplied 8-bit BGRA source pixels over a
//! destination row with correct rounding:
//!
//! ```text
//! T(D, S) = D · S.a + 0x80
//! C(D, S) = S + D − ((T >> 8 + T) >> 8)
//! ```
//!
//! `((T >> 8) + T) >> 8` is the exact division by 255 of `D · S.a`
//! (rounded), so the result is bit-identical to the reference
//! `S + D·(1 − S.a/255)`.
//!
//! Source channels are clamped to the source alpha first; some media
//! carries color values that incorrectly exceed the premultiplied
//! alpha, e.g. red 255 over alpha 254, which would otherwise overflow.
//!
//! The SSE2 lane kernel handles 4 pixels per step; tails and non-x86
//! targets use the scalar mirror.

/// Blend `src` over `dst`, in place. Lengths must match and be a
/// multiple of 4 bytes.
pub fn blend_row(dst: &mut [u8], src: &[u8]) {
    debug_assert_eq!(dst.len(), src.len());
    debug_assert_eq!(dst.len() % 4, 0);

    #[cfg(target_arch = "x86_64")]
    {
        // SSE2 is baseline on x86_64.
        unsafe { blend_row_sse2(dst, src) }
    }
    #[cfg(not(target_arch = "x86_64"))]
    blend_row_scalar(dst, src);
}

/// Scalar reference kernel; also covers SIMD tails.
pub fn blend_row_scalar(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let sa = s[3];
        for c in 0..4 {
            let sc = s[c].min(sa);
            let t = u32::from(d[c]) * u32::from(sa) + 0x80;
            let sub = ((t >> 8) + t) >> 8;
            d[c] = (u32::from(sc) + u32::from(d[c]) - sub) as u8;
        }
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse2")]
unsafe fn blend_row_sse2(dst: &mut [u8], src: &[u8]) {
    use std::arch::x86_64::{
        __m128i, _mm_add_epi8, _mm_add_epi16, _mm_and_si128, _mm_andnot_si128, _mm_loadu_si128,
        _mm_min_epu8, _mm_mullo_epi16, _mm_or_si128, _mm_set1_epi16, _mm_slli_epi32,
        _mm_srli_epi16, _mm_srli_epi32, _mm_storeu_si128, _mm_sub_epi8,
    };

    let chunks = dst.len() / 16;
    let low_mask = _mm_set1_epi16(0x00FF);
    let half = _mm_set1_epi16(0x80);

    for i in 0..chunks {
        unsafe {
            let d_ptr = dst.as_mut_ptr().add(i * 16).cast::<__m128i>();
            let s_ptr = src.as_ptr().add(i * 16).cast::<__m128i>();
            let d = _mm_loadu_si128(d_ptr);
            let mut s = _mm_loadu_si128(s_ptr);

            // Replicate the source alpha across each pixel's four bytes.
            let a = _mm_srli_epi32(s, 24);
            let aaaa = _mm_or_si128(
                _mm_or_si128(a, _mm_slli_epi32(a, 8)),
                _mm_or_si128(_mm_slli_epi32(a, 16), _mm_slli_epi32(a, 24)),
            );

            // Overflow guard.
            s = _mm_min_epu8(s, aaaa);

            // One alpha per 16-bit lane.
            let xaxa = _mm_srli_epi16(aaaa, 8);

            // T for the even (low-byte) and odd (high-byte) channels.
            let t1 = _mm_add_epi16(_mm_mullo_epi16(_mm_and_si128(d, low_mask), xaxa), half);
            let t2 = _mm_add_epi16(_mm_mullo_epi16(_mm_srli_epi16(d, 8), xaxa), half);

            // ((T >> 8) + T) >> 8, re-interleaved into byte positions.
            let even = _mm_and_si128(
                _mm_srli_epi16(_mm_add_epi16(_mm_srli_epi16(t1, 8), t1), 8),
                low_mask,
            );
            let odd = _mm_andnot_si128(low_mask, _mm_add_epi16(_mm_srli_epi16(t2, 8), t2));
            let sub = _mm_or_si128(even, odd);

            _mm_storeu_si128(d_ptr, _mm_add_epi8(s, _mm_sub_epi8(d, sub)));
        }
    }

    let tail = chunks * 16;
    blend_row_scalar(&mut dst[tail..], &src[tail..]);
}
