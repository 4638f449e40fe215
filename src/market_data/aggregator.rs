// =============================================================================
// Timeframe Aggregator — up-sample fine candles into coarser bins
// =============================================================================
//
// Bins are aligned to absolute boundaries (`floor(open_time / step) * step`),
// so 10m bins always start at :00, :10, :20 ... regardless of where the input
// begins. Partial bins at either end are emitted as they are.
// =============================================================================

use super::Candle;

const MINUTE_MS: i64 = 60_000;

/// Aggregate `base` candles into bins of `step_minutes`.
///
/// Input is expected in ascending `open_time` order; an unsorted slice is
/// sorted on a copy first. A step of one minute or less returns the input.
pub fn aggregate(base: &[Candle], step_minutes: i64) -> Vec<Candle> {
    if base.is_empty() {
        return Vec::new();
    }
    if step_minutes <= 1 {
        return base.to_vec();
    }

    let sorted;
    let candles: &[Candle] = if base.windows(2).all(|w| w[0].open_time <= w[1].open_time) {
        base
    } else {
        let mut copy = base.to_vec();
        copy.sort_by_key(|c| c.open_time);
        sorted = copy;
        &sorted
    };

    let step_ms = step_minutes * MINUTE_MS;
    let mut out: Vec<Candle> = Vec::new();

    for c in candles {
        let bin_start = c.open_time - c.open_time.rem_euclid(step_ms);
        match out.last_mut() {
            Some(bin) if bin.open_time == bin_start => {
                bin.high = bin.high.max(c.high);
                bin.low = bin.low.min(c.low);
                bin.close = c.close;
                bin.volume += c.volume;
            }
            _ => out.push(Candle {
                open_time: bin_start,
                ..*c
            }),
        }
    }

    out
}

// =============================================================================
// Tests
// =============================================================================
