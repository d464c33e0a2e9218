use wtd_core::{ContentItem, Coordinates, DistanceBand};

/// Attaches `distance_m` relative to `center` and drops posts outside the
/// band's radius. Posts without coordinates are kept.
pub fn annotate_and_filter(
    items: Vec<ContentItem>,
    center: Option<Coordinates>,
    band: DistanceBand,
) -> Vec<ContentItem> {
    let Some(center) = center else {
        return items;
    };
    let radius = band.radius_m();

    items
        .into_iter()
        .map(|mut item| {
            item.distance_m = item.coordinates.map(|c| center.distance_to_m(&c));
            item
        })
        .filter(|item| match (item.distance_m, radius) {
            (Some(distance), Some(radius)) => distance <= radius,
            _ => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn center() -> Coordinates {
        Coordinates::new(44.9778, -93.2650)
    }

    fn pool() -> Vec<ContentItem> {
        vec![
            // ~1.1 km north
            ContentItem::new("close").with_coordinates(Coordinates::new(44.9878, -93.2650)),
            // ~22 km north
            ContentItem::new("far").with_coordinates(Coordinates::new(45.1778, -93.2650)),
            ContentItem::new("unknown"),
        ]
    }

    fn ids(items: &[ContentItem]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn test_near_band_drops_distant_posts() {
        let kept = annotate_and_filter(pool(), Some(center()), DistanceBand::Near);
        assert_eq!(ids(&kept), vec!["close", "unknown"]);
        assert!(kept[0].distance_m.unwrap() < 2_000.0);
        assert_eq!(kept[1].distance_m, None);
    }

    #[test]
    fn test_far_band_keeps_both() {
        let kept = annotate_and_filter(pool(), Some(center()), DistanceBand::Far);
        assert_eq!(ids(&kept), vec!["close", "far", "unknown"]);
    }

    #[test]
    fn test_any_band_annotates_without_filtering() {
        let kept = annotate_and_filter(pool(), Some(center()), DistanceBand::Any);
        assert_eq!(kept.len(), 3);
        assert!(kept[1].distance_m.unwrap() > 20_000.0);
    }

    #[test]
    fn test_no_center_passes_through() {
        let kept = annotate_and_filter(pool(), None, DistanceBand::Near);
        assert_eq!(kept, pool());
    }
}
