use std::borrow::Cow;

/// Sentinel id for the unfiltered listing. Never scraped by default.
pub const ALL_CATEGORIES: u32 = 0;

/// Known category ids and display names, in the order the site lists them.
pub const CATEGORIES: &[(u32, &str)] = &[
    (0, "All Categories"),
    (1, "Autos and vehicles"),
    (2, "Beauty and fashion"),
    (3, "Business and finance"),
    (20, "Climate"),
    (4, "Entertainment"),
    (5, "Food and drink"),
    (6, "Games"),
    (7, "Health"),
    (8, "Hobbies and leisure"),
    (9, "Jobs and education"),
    (10, "Law and government"),
    (11, "Other"),
    (13, "Pets and animals"),
    (14, "Politics"),
    (15, "Science"),
    (16, "Shopping"),
    (17, "Sports"),
    (18, "Technology"),
    (19, "Travel and transportation"),
];

pub fn lookup(id: u32) -> Option<&'static str> {
    CATEGORIES
        .iter()
        .find(|(cid, _)| *cid == id)
        .map(|(_, name)| *name)
}

/// Display name for `id`, synthesizing `"Category <id>"` for unknown ids.
pub fn display_name(id: u32) -> Cow<'static, str> {
    match lookup(id) {
        Some(name) => Cow::Borrowed(name),
        None => Cow::Owned(format!("Category {}", id)),
    }
}

/// Every registry id except the "all categories" sentinel.
pub fn default_ids() -> Vec<u32> {
    CATEGORIES
        .iter()
        .map(|(id, _)| *id)
        .filter(|id| *id != ALL_CATEGORIES)
        .collect()
}

/// Listing URL for a category: `base?geo=<geo>&category=<id>`, without the
/// category parameter for the sentinel.
pub fn listing_url(base: &str, geo: &str, id: u32) -> String {
    if id == ALL_CATEGORIES {
        format!("{}?geo={}", base, geo)
    } else {
        format!("{}?geo={}&category={}", base, geo, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_skip_sentinel() {
        let ids = default_ids();
        assert_eq!(ids.len(), CATEGORIES.len() - 1);
        assert!(!ids.contains(&ALL_CATEGORIES));
        // registry order, not numeric order
        assert_eq!(ids[3], 20);
    }

    #[test]
    fn unknown_id_gets_synthesized_name() {
        assert_eq!(display_name(17), "Sports");
        assert_eq!(display_name(99), "Category 99");
    }

    #[test]
    fn url_omits_category_for_sentinel() {
        let base = "https://trends.google.com/trending";
        assert_eq!(
            listing_url(base, "IN", 0),
            "https://trends.google.com/trending?geo=IN"
        );
        assert_eq!(
            listing_url(base, "US", 18),
            "https://trends.google.com/trending?geo=US&category=18"
        );
    }
}
