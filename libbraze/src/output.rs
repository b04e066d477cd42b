use crate::error::Result;
use anyhow::ensure;
use itertools::Itertools;
use std::ops::Range;

/// Splits one output buffer into the per-section windows that the apply
/// phase patches in parallel. `ranges` must be sorted and non-overlapping;
/// anything else means layout handed us a broken plan, which is fatal.
pub(crate) fn carve<'buf>(
    buf: &'buf mut [u8],
    ranges: &[Range<usize>],
) -> Result<Vec<&'buf mut [u8]>> {
    for range in ranges {
        ensure!(
            range.start <= range.end && range.end <= buf.len(),
            "output window {range:?} does not fit in a buffer of {} bytes",
            buf.len()
        );
    }
    for (a, b) in ranges.iter().tuple_windows() {
        ensure!(
            a.end <= b.start,
            "output windows {a:?} and {b:?} overlap or are out of order"
        );
    }

    let mut windows = Vec::with_capacity(ranges.len());
    let mut rest = buf;
    let mut consumed = 0;
    for range in ranges {
        let tail = std::mem::take(&mut rest);
        let (_gap, tail) = tail.split_at_mut(range.start - consumed);
        let (window, tail) = tail.split_at_mut(range.end - range.start);
        windows.push(window);
        rest = tail;
        consumed = range.end;
    }
    Ok(windows)
}

#[test]
fn test_carve() {
    let mut buf = [0u8; 16];
    let windows = carve(&mut buf, &[1..3, 3..3, 8..12]).unwrap();
    assert_eq!(
        windows.iter().map(|w| w.len()).collect::<Vec<_>>(),
        [2, 0, 4]
    );

    assert!(carve(&mut buf, &[4..8, 0..2]).is_err());
    assert!(carve(&mut buf, &[0..8, 6..10]).is_err());
    assert!(carve(&mut buf, &[8..32]).is_err());
}
