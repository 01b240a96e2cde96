//! Static permission tables mapping booking identifiers to the device
//! entities each booking may read or control.
//!
//! Room bookings ("31".."36", "3a", "3b" for house 193; "51".."56",
//! "5a", "5b" for house 195) see only their own rooms. Whole-home
//! bookings ("193vbr", "195vbr") union every room entity of their
//! house, except sensors: whole-home guests do not see per-room
//! occupancy data.

use std::collections::BTreeSet;

/// Entity domain, one permission table per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Domain {
    Climate,
    Light,
    Sensor,
}

pub const DOMAINS: [Domain; 3] = [Domain::Climate, Domain::Light, Domain::Sensor];

/// Every booking identifier known to the permission tables.
pub const BOOKING_IDS: &[&str] = &[
    "31", "32", "33", "34", "35", "36", "3a", "3b", "51", "52", "53", "54", "55", "56", "5a", "5b",
    "193vbr", "195vbr",
];

/// Entities a booking may access within one domain. Unknown bookings
/// resolve to an empty list.
pub fn entities(domain: Domain, booking_id: &str) -> &'static [&'static str] {
    match domain {
        Domain::Climate => climate(booking_id),
        Domain::Light => light(booking_id),
        Domain::Sensor => sensor(booking_id),
    }
}

/// Whether a booking may access one entity within one domain.
pub fn is_permitted(domain: Domain, booking_id: &str, entity_id: &str) -> bool {
    entities(domain, booking_id).iter().any(|e| *e == entity_id)
}

/// Union of all three domain tables for a booking, ordered for
/// deterministic iteration.
pub fn union(booking_id: &str) -> BTreeSet<&'static str> {
    DOMAINS
        .iter()
        .flat_map(|&domain| entities(domain, booking_id).iter().copied())
        .collect()
}

fn climate(booking_id: &str) -> &'static [&'static str] {
    match booking_id {
        "31" => &["climate.193_1_trv"],
        "32" => &["climate.193_2_trv"],
        "33" => &["climate.193_c_trv", "climate.193_3_trv"],
        "34" => &["climate.193_4_trv"],
        "35" => &["climate.193_5_trv"],
        "36" => &["climate.193_6_trv"],
        "3a" => &["climate.193_1_trv", "climate.193_2_trv"],
        "3b" => &["climate.193_4_trv", "climate.193_5_trv", "climate.193_6_trv"],
        "51" => &["climate.195_1_trv"],
        "52" => &["climate.195_2_trv"],
        "53" => &["climate.195_c_trv", "climate.195_3_trv"],
        "54" => &["climate.195_4_trv"],
        "55" => &["climate.195_5_trv"],
        "56" => &["climate.195_6_trv"],
        "5a" => &["climate.195_1_trv", "climate.195_2_trv"],
        "5b" => &["climate.195_4_trv", "climate.195_5_trv", "climate.195_6_trv"],
        "193vbr" => &[
            "climate.193_1_trv",
            "climate.193_2_trv",
            "climate.193_3_trv",
            "climate.193_c_trv",
            "climate.193_4_trv",
            "climate.193_5_trv",
            "climate.193_6_trv",
        ],
        "195vbr" => &[
            "climate.195_1_trv",
            "climate.195_2_trv",
            "climate.195_3_trv",
            "climate.195_c_trv",
            "climate.195_4_trv",
            "climate.195_5_trv",
            "climate.195_6_trv",
        ],
        _ => &[],
    }
}

fn light(booking_id: &str) -> &'static [&'static str] {
    match booking_id {
        "31" => &["light.193_1_lights"],
        "32" => &["light.193_2_lights"],
        "33" => &["light.193_3_lights", "light.193_3_lamps", "light.193_c_lights"],
        "34" => &["light.193_4_lights", "light.193_4_lamps"],
        "35" => &["light.193_5_lights"],
        "36" => &["light.193_6_lights"],
        "3a" => &["light.193_1_lights", "light.193_2_lights"],
        "3b" => &[
            "light.193_4_lights",
            "light.193_4_lamps",
            "light.193_5_lights",
            "light.193_6_lights",
        ],
        "51" => &["light.195_1_lights"],
        "52" => &["light.195_2_lights"],
        "53" => &["light.195_3_lights", "light.195_3_lamps", "light.195_c_lights"],
        "54" => &["light.195_4_lights", "light.195_4_lamps"],
        "55" => &["light.195_5_lights"],
        "56" => &["light.195_6_lights"],
        "5a" => &["light.195_1_lights", "light.195_2_lights"],
        "5b" => &[
            "light.195_4_lights",
            "light.195_4_lamps",
            "light.195_5_lights",
            "light.195_6_lights",
        ],
        "193vbr" => &[
            "light.193_1_lights",
            "light.193_2_lights",
            "light.193_3_lights",
            "light.193_3_lamps",
            "light.193_c_lights",
            "light.193_4_lights",
            "light.193_4_lamps",
            "light.193_5_lights",
            "light.193_6_lights",
        ],
        "195vbr" => &[
            "light.195_1_lights",
            "light.195_2_lights",
            "light.195_3_lights",
            "light.195_3_lamps",
            "light.195_c_lights",
            "light.195_4_lights",
            "light.195_4_lamps",
            "light.195_5_lights",
            "light.195_6_lights",
        ],
        _ => &[],
    }
}

fn sensor(booking_id: &str) -> &'static [&'static str] {
    const HOUSE_193: &[&str] = &[
        "binary_sensor.193_a_presence_presence",
        "binary_sensor.193_b_presence_presence",
        "binary_sensor.193_k_presence_presence",
    ];
    const HOUSE_195: &[&str] = &[
        "binary_sensor.195_a_presence_presence",
        "binary_sensor.195_b_presence_presence",
        "binary_sensor.195_k_presence_presence",
    ];

    match booking_id {
        "31" | "32" | "34" | "35" | "36" | "3a" | "3b" => HOUSE_193,
        "33" => &["binary_sensor.193_k_presence_presence"],
        "51" | "52" | "54" | "55" | "56" | "5a" | "5b" => HOUSE_195,
        "53" => &["binary_sensor.195_k_presence_presence"],
        // Whole home bookings don't see occupancy sensors
        "193vbr" | "195vbr" => &[],
        _ => &[],
    }
}
