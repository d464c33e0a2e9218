//! Mode classifier: decides whether a post is relevant to the user's intent.
//!
//! Metadata is consulted in layers. A recorded topic always decides on its
//! own; tags are consulted only for untopiced posts, and free-text keywords
//! only when there are no tags either.

use wtd_core::{ContentItem, Mode, PostType, Topic};

pub const HUNGRY_TOPICS: [Topic; 2] = [Topic::FoodDrink, Topic::Nightlife];

pub const BORED_TOPICS: [Topic; 7] = [
    Topic::Events,
    Topic::Outdoors,
    Topic::Attractions,
    Topic::Everyday,
    Topic::History,
    Topic::Legends,
    Topic::Nightlife,
];

pub const FOOD_KEYWORDS: [&str; 15] = [
    "eat",
    "food",
    "restaurant",
    "pizza",
    "taco",
    "coffee",
    "brunch",
    "dinner",
    "lunch",
    "breakfast",
    "bar",
    "pub",
    "sushi",
    "bbq",
    "burger",
];

pub const FOOD_TAGS: [&str; 20] = [
    "food",
    "food_drink",
    "drink",
    "drinks",
    "restaurant",
    "cafe",
    "coffee",
    "bakery",
    "brunch",
    "breakfast",
    "lunch",
    "dinner",
    "bar",
    "pub",
    "pizza",
    "taco",
    "sushi",
    "bbq",
    "burger",
    "dessert",
];

pub const ENTERTAINMENT_TAGS: [&str; 3] = ["music", "comedy", "outdoors"];

pub fn matches(item: &ContentItem, mode: Mode) -> bool {
    match mode {
        Mode::Unsure => true,
        Mode::Hungry => matches_hungry(item),
        Mode::Bored => matches_bored(item),
    }
}

fn matches_hungry(item: &ContentItem) -> bool {
    if let Some(topic) = item.topic {
        return HUNGRY_TOPICS.contains(&topic);
    }
    if !item.tags.is_empty() {
        return item.tags.iter().any(|tag| FOOD_TAGS.contains(&tag.as_str()));
    }

    let text = format!("{} {}", item.title, item.body).to_lowercase();
    FOOD_KEYWORDS.iter().any(|word| text.contains(word))
}

fn matches_bored(item: &ContentItem) -> bool {
    if let Some(topic) = item.topic {
        return BORED_TOPICS.contains(&topic);
    }
    if item
        .tags
        .iter()
        .any(|tag| ENTERTAINMENT_TAGS.contains(&tag.as_str()))
    {
        return true;
    }

    matches!(
        item.post_type,
        PostType::Event | PostType::General | PostType::Advice
    )
}
