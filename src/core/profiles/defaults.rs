//! Built-in profiles shipped with the engine.

use std::collections::BTreeMap;

use super::{
    AudienceProfile, AudienceThresholds, Band, DimensionWeights, Layer, LayerType,
    MarkerSeverity, ProfileSnapshot, TopicMarker, DEFAULT_PROFILE_KEY,
};

/// Snapshot with every built-in layer, audience and emotion lexicon.
pub fn builtin_snapshot() -> ProfileSnapshot {
    ProfileSnapshot::new(builtin_layers(), builtin_audiences(), builtin_lexicon())
}

fn layer(layer_type: LayerType, key: &str, name: &str, weight: f32, content: &str) -> Layer {
    Layer::new(layer_type, key, name, content.trim(), weight)
}

fn builtin_layers() -> Vec<Layer> {
    use LayerType::*;

    vec![
        // System note
        layer(
            SystemNote,
            DEFAULT_PROFILE_KEY,
            "Children's book author",
            1.0,
            "You are an experienced author of illustrated chapter books. \
             You write vivid, age-appropriate prose with a clear arc in every chapter.",
        ),
        layer(
            SystemNote,
            "literary",
            "Literary author",
            1.0,
            "You are a literary novelist. You favour subtext, precise imagery and \
             characters whose choices drive the plot.",
        ),
        // Audiences
        layer(
            Audience,
            DEFAULT_PROFILE_KEY,
            "General readers",
            0.8,
            "Write for a general readership. Keep the language clear and the pacing steady.",
        ),
        layer(
            Audience,
            "preschool",
            "Preschool (3-5)",
            1.0,
            "Readers are 3 to 5 years old and the text is read aloud to them.\n\
             Use very short sentences and concrete, everyday words.\n\
             Repetition of a key phrase is welcome. Nothing frightening.",
        ),
        layer(
            Audience,
            "early_reader",
            "Early reader (6-8)",
            1.0,
            "Readers are 6 to 8 years old and read on their own for the first time.\n\
             Use short sentences, simple words and plenty of dialogue.\n\
             Conflicts are small and resolved warmly.",
        ),
        layer(
            Audience,
            "middle_grade",
            "Middle grade (9-12)",
            1.0,
            "Readers are 9 to 12 years old.\n\
             Moderate sentence length, rich but accessible vocabulary.\n\
             Real stakes are fine; keep the tone hopeful.",
        ),
        layer(
            Audience,
            "young_adult",
            "Young adult (13-17)",
            1.0,
            "Readers are teenagers.\n\
             Varied sentence length, emotional honesty, characters with inner conflict.",
        ),
        layer(
            Audience,
            "adult",
            "Adult",
            1.0,
            "Readers are adults. Any vocabulary and sentence structure that serves the story.",
        ),
        // Genres
        layer(
            Genre,
            DEFAULT_PROFILE_KEY,
            "General fiction",
            0.4,
            "Tell a self-contained story with a beginning, a turn and an ending.\n\
             Ground the reader in place and time early.\n\
             Give the protagonist a concrete goal.",
        ),
        layer(
            Genre,
            "adventure",
            "Adventure",
            1.0,
            "Adventure: a journey, an obstacle and a discovery.\n\
             Keep momentum high and end the chapter on forward motion.",
        ),
        layer(
            Genre,
            "fantasy",
            "Fantasy",
            1.0,
            "Fantasy: magic follows consistent rules.\n\
             Introduce one wondrous element per scene and show how characters react to it.",
        ),
        layer(
            Genre,
            "self_discovery",
            "Self-discovery",
            1.0,
            "Self-discovery: the protagonist learns something about themselves.\n\
             Show the change through a choice, not through explanation.",
        ),
        layer(
            Genre,
            "friendship",
            "Friendship",
            1.0,
            "Friendship: two or more characters grow closer by facing something together.",
        ),
        layer(
            Genre,
            "mystery",
            "Mystery",
            1.0,
            "Mystery: plant clues fairly, let the reader guess, reveal at the right moment.",
        ),
        // Emotions
        layer(
            Emotion,
            DEFAULT_PROFILE_KEY,
            "Warmth",
            0.6,
            "Let warmth and curiosity carry the chapter.",
        ),
        layer(
            Emotion,
            "wonder",
            "Wonder",
            1.0,
            "Core emotion: wonder. Let characters pause, stare and marvel at what they find.",
        ),
        layer(
            Emotion,
            "courage",
            "Courage",
            1.0,
            "Core emotion: courage. A character hesitates, then acts despite doubt.",
        ),
        layer(
            Emotion,
            "friendship",
            "Friendship",
            1.0,
            "Core emotion: friendship. Show loyalty and shared joy in small gestures.",
        ),
        layer(
            Emotion,
            "growth",
            "Growth",
            1.0,
            "Core emotion: growth. Contrast who the character was with who they are becoming.",
        ),
        layer(
            Emotion,
            "mystery",
            "Mystery",
            1.0,
            "Core emotion: curiosity. Every answer raises a smaller, sharper question.",
        ),
        // Styles
        layer(
            Style,
            DEFAULT_PROFILE_KEY,
            "Classic narration",
            0.7,
            "Past tense, third person limited. Concrete sensory detail. Show, don't tell.",
        ),
        layer(
            Style,
            "whimsical",
            "Whimsical",
            0.9,
            "Playful rhythm, gentle humour, occasional sound words.",
        ),
        layer(
            Style,
            "lyrical",
            "Lyrical",
            0.9,
            "Flowing sentences, imagery drawn from nature, a calm cadence.",
        ),
        // Narrative context frame, filled from the request
        layer(
            NarrativeContext,
            DEFAULT_PROFILE_KEY,
            "Chapter context",
            1.0,
            "Continue the book consistently with what came before.",
        ),
        // Constraints
        layer(
            Constraints,
            DEFAULT_PROFILE_KEY,
            "Baseline constraints",
            1.0,
            "Stay within the requested length.\n\
             Do not add a title, notes or commentary; output only the chapter text.\n\
             Separate paragraphs with a blank line.",
        ),
        // Languages
        layer(
            Language,
            DEFAULT_PROFILE_KEY,
            "Output language",
            1.0,
            "Write in the requested language.",
        ),
        layer(
            Language,
            "de",
            "German",
            1.0,
            "Deutsch: natürliche, idiomatische Sprache; keine wörtliche Übersetzung.",
        ),
        layer(
            Language,
            "en",
            "English",
            1.0,
            "English: natural, idiomatic prose; never a literal translation.",
        ),
    ]
}

fn child_markers(include_mild: bool) -> Vec<TopicMarker> {
    let mut markers = vec![
        TopicMarker::new(
            "violence",
            "Depictions of violence",
            MarkerSeverity::High,
            &[
                r"\b(blut|blood|gewalt|violence|töten|kill|killed)\b",
                r"\b(waffe|weapon|messer|knife|pistole|gun)\b",
            ],
        ),
        TopicMarker::new(
            "inappropriate_content",
            "Content unsuitable for children",
            MarkerSeverity::Medium,
            &[
                r"\b(alkohol|alcohol|drogen|drugs|rauchen|smoking)\b",
                r"\b(fluchen|swearing|schimpfwörter)\b",
            ],
        ),
    ];
    if include_mild {
        markers.push(TopicMarker::new(
            "negative_emotions",
            "Overwhelming negative emotions",
            MarkerSeverity::Medium,
            &[
                r"\b(verzweiflung|despair|hoffnungslos|hopeless|selbstmord|suicide)\b",
                r"\b(hass|hate|terror|panik|panic)\b",
            ],
        ));
        markers.push(TopicMarker::new(
            "complex_concepts",
            "Concepts beyond the age group",
            MarkerSeverity::Low,
            &[
                r"\b(philosophie|philosophy|metaphysik|metaphysics)\b",
                r"\b(politik|politics|ideologie|ideology)\b",
            ],
        ));
    }
    markers
}

fn audience(
    key: &str,
    name: &str,
    ages: (u8, u8),
    thresholds: AudienceThresholds,
    weights: DimensionWeights,
    forbidden_markers: Vec<TopicMarker>,
) -> AudienceProfile {
    AudienceProfile {
        key: key.to_string(),
        name: name.to_string(),
        min_age: ages.0,
        max_age: ages.1,
        thresholds,
        weights,
        forbidden_markers,
    }
}

fn builtin_audiences() -> Vec<AudienceProfile> {
    vec![
        audience(
            "preschool",
            "Preschool (3-5)",
            (3, 5),
            AudienceThresholds {
                word_band: Band::new(100, 300),
                target_words: 200,
                min_emotion_ratio: 0.15,
                max_repetition_ratio: 0.15,
                sentence_length: Band::new(3.0, 8.0),
                paragraph_count: Band::new(2, 6),
            },
            DimensionWeights {
                word_limit: 0.20,
                core_emotion: 0.20,
                repetition: 0.10,
                readability: 0.30,
                structure: 0.20,
            },
            child_markers(true),
        ),
        audience(
            "early_reader",
            "Early reader (6-8)",
            (6, 8),
            AudienceThresholds {
                word_band: Band::new(300, 600),
                target_words: 400,
                min_emotion_ratio: 0.15,
                max_repetition_ratio: 0.12,
                sentence_length: Band::new(5.0, 12.0),
                paragraph_count: Band::new(3, 8),
            },
            DimensionWeights::default(),
            child_markers(true),
        ),
        audience(
            "middle_grade",
            "Middle grade (9-12)",
            (9, 12),
            AudienceThresholds {
                word_band: Band::new(600, 1000),
                target_words: 800,
                min_emotion_ratio: 0.12,
                max_repetition_ratio: 0.10,
                sentence_length: Band::new(8.0, 15.0),
                paragraph_count: Band::new(4, 12),
            },
            DimensionWeights::default(),
            child_markers(false),
        ),
        audience(
            "young_adult",
            "Young adult (13-17)",
            (13, 17),
            AudienceThresholds {
                word_band: Band::new(1000, 1500),
                target_words: 1200,
                min_emotion_ratio: 0.10,
                max_repetition_ratio: 0.08,
                sentence_length: Band::new(10.0, 20.0),
                paragraph_count: Band::new(6, 16),
            },
            DimensionWeights::default(),
            Vec::new(),
        ),
        audience(
            "adult",
            "Adult",
            (18, 99),
            AudienceThresholds {
                word_band: Band::new(1200, 2000),
                target_words: 1500,
                min_emotion_ratio: 0.08,
                max_repetition_ratio: 0.08,
                sentence_length: Band::new(10.0, 25.0),
                paragraph_count: Band::new(6, 20),
            },
            DimensionWeights::default(),
            Vec::new(),
        ),
    ]
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|w| w.to_string()).collect()
}

fn builtin_lexicon() -> BTreeMap<String, BTreeMap<String, Vec<String>>> {
    let mut de = BTreeMap::new();
    de.insert(
        "wonder".to_string(),
        words(&["staunen", "staunte", "wundern", "verwundert", "erstaunt", "fasziniert"]),
    );
    de.insert(
        "joy".to_string(),
        words(&["freude", "fröhlich", "glücklich", "begeistert", "vergnügt"]),
    );
    de.insert(
        "courage".to_string(),
        words(&["mut", "mutig", "tapfer", "beherzt", "furchtlos"]),
    );
    de.insert(
        "friendship".to_string(),
        words(&["freundschaft", "freund", "freunde", "freundlich", "verbunden", "gemeinsam"]),
    );
    de.insert(
        "growth".to_string(),
        words(&["wachsen", "lernen", "lernte", "entwickeln", "reifen", "fortschritt"]),
    );
    de.insert(
        "mystery".to_string(),
        words(&["rätsel", "geheimnis", "geheimnisvoll", "neugierig", "hinweis"]),
    );

    let mut en = BTreeMap::new();
    en.insert(
        "wonder".to_string(),
        words(&["wonder", "amazed", "astonished", "fascinated", "curious", "marvel"]),
    );
    en.insert(
        "joy".to_string(),
        words(&["joy", "happy", "excited", "delighted", "cheerful"]),
    );
    en.insert(
        "courage".to_string(),
        words(&["courage", "brave", "bold", "fearless", "daring"]),
    );
    en.insert(
        "friendship".to_string(),
        words(&["friendship", "friend", "friends", "friendly", "together", "bond"]),
    );
    en.insert(
        "growth".to_string(),
        words(&["grow", "learn", "learned", "develop", "progress", "improve"]),
    );
    en.insert(
        "mystery".to_string(),
        words(&["mystery", "secret", "puzzle", "clue", "curious"]),
    );

    let mut lexicon = BTreeMap::new();
    lexicon.insert("de".to_string(), de);
    lexicon.insert("en".to_string(), en);
    lexicon
}
