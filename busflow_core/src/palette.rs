//! Route colours.

/// High-contrast colours, indexed by route hash.
pub const PALETTE: [&str; 20] = [
    "#FF5733", "#33FF57", "#3357FF", "#FF33A8", "#FFD700",
    "#FF8C00", "#8A2BE2", "#20B2AA", "#DC143C", "#00FA9A",
    "#FF4500", "#7FFF00", "#1E90FF", "#FF1493", "#32CD32",
    "#9932CC", "#4682B4", "#DAA520", "#FF6347", "#40E0D0",
];

/// Stable colour for a route label.
///
/// `hash = unit + ((hash << 5) - hash)` over the UTF-16 code units, so the
/// web map and the tracker agree on every route's colour. Only the shift is
/// 32-bit; the subtraction and addition run on the full-width accumulator.
pub fn color_for(route_id: &str) -> &'static str {
    let hash = route_id.encode_utf16().fold(0i64, |hash, unit| {
        let shifted = (hash as u32 as i32).wrapping_shl(5) as i64;
        (unit as i64).wrapping_add(shifted.wrapping_sub(hash))
    });
    PALETTE[(hash.unsigned_abs() % PALETTE.len() as u64) as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_routes() {
        // "7" = 55 → 55 % 20 = 15
        assert_eq!(color_for("7"), PALETTE[15]);
        // "12" = 49 * 31 + 50 = 1569 → 9
        assert_eq!(color_for("12"), PALETTE[9]);
        assert_eq!(color_for(""), PALETTE[0]);
    }

    #[test]
    fn test_deterministic() {
        for route in ["1", "7", "18", "Express 30", "ルート"] {
            assert_eq!(color_for(route), color_for(route));
        }
    }

    #[test]
    fn test_long_route_wraps_without_panic() {
        let long = "X".repeat(10_000);
        assert!(PALETTE.contains(&color_for(&long)));
    }
}
