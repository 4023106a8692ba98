// Copyright 2025 Memory Validation Contributors
// SPDX-License-Identifier: Apache-2.0

//! Synthetic fixture data.

use crate::store::{EntityRecord, RelationRecord, TenantRef};
use chrono::{Duration as ChronoDuration, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::{json, Map, Value};

const FIRST_NAMES: &[&str] = &[
    "Alice", "Bob", "Carol", "David", "Eve", "Frank", "Grace", "Heidi", "Ivan", "Judy", "Mallory",
    "Niaj", "Olivia", "Peggy", "Rupert", "Sybil", "Trent", "Victor", "Walter", "Yolanda",
];

const LAST_NAMES: &[&str] = &[
    "Smith", "Johnson", "Williams", "Brown", "Jones", "Garcia", "Miller", "Davis", "Martinez",
    "Lopez", "Wilson", "Anderson", "Thomas", "Taylor", "Moore",
];

const SKILLS: &[&str] = &[
    "Python", "SQL", "Rust", "Machine Learning", "Sales", "Negotiation", "Design", "Writing",
    "Leadership", "Analytics",
];

const LOCATIONS: &[&str] = &["Berlin", "Lisbon", "Toronto", "Austin", "Singapore", "Nairobi"];

const RELATIONSHIP_TYPES: &[&str] = &[
    "knows",
    "works_with",
    "manages",
    "reports_to",
    "collaborates_with",
];

const WORDS: &[&str] = &[
    "memory", "graph", "entity", "relation", "client", "context", "signal", "history", "note",
    "summary", "insight", "follow-up", "meeting", "project", "priority", "decision",
];

/// Payload size class used by text benchmarks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextSize {
    /// Under 1 KB.
    Small,
    /// 1 to 10 KB.
    Medium,
    /// 10 to 50 KB.
    Large,
}

impl TextSize {
    /// Every size, smallest first.
    pub const ALL: [TextSize; 3] = [TextSize::Small, TextSize::Medium, TextSize::Large];

    /// Target payload length in bytes.
    pub fn target_bytes(&self) -> usize {
        match self {
            TextSize::Small => 500,
            TextSize::Medium => 5_000,
            TextSize::Large => 25_000,
        }
    }

    /// Report label.
    pub fn label(&self) -> &'static str {
        match self {
            TextSize::Small => "small",
            TextSize::Medium => "medium",
            TextSize::Large => "large",
        }
    }
}

/// Seedable generator of entities, relations and payloads.
#[derive(Debug)]
pub struct TestDataGenerator {
    rng: StdRng,
    sequence: u64,
}

impl Default for TestDataGenerator {
    fn default() -> Self {
        Self::from_entropy()
    }
}

impl TestDataGenerator {
    /// Deterministic generator.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            sequence: 0,
        }
    }

    /// Generator seeded from the OS.
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            sequence: 0,
        }
    }

    fn pick<'a>(&mut self, items: &'a [&'a str]) -> &'a str {
        items.choose(&mut self.rng).copied().unwrap_or_default()
    }

    /// A `person` entity with nested personal metadata.
    ///
    /// Names carry a sequence suffix, so entities from one generator never
    /// share a name.
    pub fn person(&mut self, tenant: &TenantRef) -> EntityRecord {
        self.sequence += 1;
        let first = self.pick(FIRST_NAMES);
        let last = self.pick(LAST_NAMES);
        let name = format!("{first} {last} {}", self.sequence);
        let skills: Vec<&str> = SKILLS
            .choose_multiple(&mut self.rng, 3)
            .copied()
            .collect();
        let metadata = json!({
            "entity_type": "person",
            "personal_info": {
                "age": self.rng.gen_range(22..70),
                "email": format!("{}.{}{}@example.com", first.to_lowercase(), last.to_lowercase(), self.sequence),
                "location": self.pick(LOCATIONS),
            },
            "skills": skills,
            "preferences": {
                "work_style": if self.rng.gen_bool(0.5) { "remote" } else { "office" },
                "communication": ["email", "slack"],
            },
        });
        EntityRecord::new(tenant, name, "person")
            .with_metadata(metadata)
            .with_grade(self.rng.gen_range(0.5..1.0))
    }

    /// `count` person entities.
    pub fn people(&mut self, tenant: &TenantRef, count: usize) -> Vec<EntityRecord> {
        (0..count).map(|_| self.person(tenant)).collect()
    }

    /// `count` relations between distinct members of `entities`.
    ///
    /// Returns fewer when there are not two entities to connect.
    pub fn relationships(
        &mut self,
        tenant: &TenantRef,
        entities: &[EntityRecord],
        count: usize,
    ) -> Vec<RelationRecord> {
        if entities.len() < 2 {
            return Vec::new();
        }
        (0..count)
            .map(|i| {
                let source = i % entities.len();
                let offset = self.rng.gen_range(1..entities.len());
                let target = (source + offset) % entities.len();
                let kind = self.pick(RELATIONSHIP_TYPES);
                RelationRecord::new(tenant, entities[source].id, entities[target].id, kind)
                    .with_metadata(json!({
                        "strength": self.rng.gen_range(0.1..1.0),
                        "since": (Utc::now() - ChronoDuration::days(self.rng.gen_range(1..365))).to_rfc3339(),
                    }))
            })
            .collect()
    }

    /// Whitespace-separated words totalling exactly `bytes` bytes.
    pub fn text(&mut self, bytes: usize) -> String {
        let mut out = String::with_capacity(bytes + 16);
        while out.len() < bytes {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(self.pick(WORDS));
        }
        out.truncate(bytes);
        out
    }

    /// Text payload of the given size class.
    pub fn text_sample(&mut self, size: TextSize) -> String {
        self.text(size.target_bytes())
    }

    /// Roughly 100 KB of metadata: a 10 KB description, 100 history entries,
    /// 1000 tags and 500 metrics.
    pub fn large_metadata(&mut self) -> Value {
        let now = Utc::now();
        let history: Vec<Value> = (0..100)
            .map(|i| {
                json!({
                    "date": (now - ChronoDuration::days(i)).to_rfc3339(),
                    "event": format!("Event {i}: {}", "B".repeat(100)),
                    "details": {
                        "participants": (0..10).map(|j| format!("Person {j}")).collect::<Vec<_>>(),
                        "notes": "C".repeat(200),
                    },
                })
            })
            .collect();
        let tags: Vec<String> = (0..1000).map(|i| format!("tag_{i}")).collect();
        let mut metrics = Map::new();
        for i in 0..500 {
            metrics.insert(format!("metric_{i}"), json!(self.rng.gen_range(0.0..1.0)));
        }

        json!({
            "description": "A".repeat(10_000),
            "history": history,
            "tags": tags,
            "metrics": metrics,
        })
    }

    /// Deeply nested metadata with known values at fixed paths.
    pub fn complex_metadata(&mut self) -> Value {
        let now = Utc::now();
        json!({
            "entity_type": "person",
            "personal_info": {
                "age": 30,
                "skills": ["Python", "SQL", "Machine Learning"],
                "preferences": {
                    "work_style": "remote",
                    "communication": ["email", "slack"],
                },
            },
            "timestamps": {
                "last_contact": now.to_rfc3339(),
                "next_followup": (now + ChronoDuration::days(7)).to_rfc3339(),
            },
            "metrics": {
                "engagement_score": 0.85,
                "response_rate": 0.92,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_seeded_generators_agree() {
        let tenant = TenantRef::client("fixture");
        let a = TestDataGenerator::new(7).person(&tenant);
        let b = TestDataGenerator::new(7).person(&tenant);
        assert_eq!(a.name, b.name);
        assert_eq!(a.metadata, b.metadata);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_people_have_unique_names() {
        let tenant = TenantRef::client("fixture");
        let people = TestDataGenerator::new(1).people(&tenant, 200);
        let names: HashSet<_> = people.iter().map(|p| p.name.clone()).collect();
        assert_eq!(names.len(), 200);
        assert!(people.iter().all(|p| (0.5..1.0).contains(&p.grade)));
    }

    #[test]
    fn test_relationships_never_self_loop() {
        let tenant = TenantRef::client("fixture");
        let mut generator = TestDataGenerator::new(3);
        let people = generator.people(&tenant, 4);
        let relations = generator.relationships(&tenant, &people, 20);
        assert_eq!(relations.len(), 20);
        assert!(relations.iter().all(|r| r.source_id != r.target_id));
        assert!(generator.relationships(&tenant, &people[..1], 5).is_empty());
    }

    #[test]
    fn test_text_sizes() {
        let mut generator = TestDataGenerator::new(9);
        assert!(generator.text_sample(TextSize::Small).len() < 1024);
        let medium = generator.text_sample(TextSize::Medium).len();
        assert!((1024..10 * 1024).contains(&medium));
        let large = generator.text_sample(TextSize::Large).len();
        assert!((10 * 1024..50 * 1024).contains(&large));
    }

    #[test]
    fn test_large_metadata_is_about_100kb() {
        let metadata = TestDataGenerator::new(5).large_metadata();
        let size = metadata.to_string().len();
        assert!(size > 80 * 1024, "size was {size}");
        assert_eq!(metadata["history"].as_array().map(Vec::len), Some(100));
        assert_eq!(metadata["tags"].as_array().map(Vec::len), Some(1000));
        assert_eq!(metadata["metrics"].as_object().map(Map::len), Some(500));
    }
}
