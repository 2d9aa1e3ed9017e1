//! Ship footprint vs. wall tile collision

use super::map::GridMap;
use super::vector::Vec2;

/// Circle vs. axis-aligned box overlap (touching counts as overlap)
pub fn circle_intersects_aabb(pos: Vec2, radius: f64, min: Vec2, max: Vec2) -> bool {
    let closest = Vec2::new(pos.x.clamp(min.x, max.x), pos.y.clamp(min.y, max.y));
    (pos - closest).length_squared() <= radius * radius
}

/// Whether a circle of `radius` centred at `pos` overlaps any wall tile
pub fn collides(map: &GridMap, pos: Vec2, radius: f64) -> bool {
    let min_x = (pos.x - radius).floor() as i64;
    let max_x = (pos.x + radius).floor() as i64;
    let min_y = (pos.y - radius).floor() as i64;
    let max_y = (pos.y + radius).floor() as i64;

    for y in min_y..=max_y {
        for x in min_x..=max_x {
            if !map.is_wall(x, y) {
                continue;
            }
            let min = Vec2::new(x as f64, y as f64);
            let max = Vec2::new(x as f64 + 1.0, y as f64 + 1.0);
            if circle_intersects_aabb(pos, radius, min, max) {
                return true;
            }
        }
    }

    false
}
