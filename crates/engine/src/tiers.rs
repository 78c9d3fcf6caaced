use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseTier {
    pub id: &'static str,
    pub name: &'static str,
    pub price_cents: i64,
}

/// Ordered cheapest first.
pub const LICENSE_TIERS: [LicenseTier; 4] = [
    LicenseTier {
        id: "mp3_tagged",
        name: "MP3 + Tag Files",
        price_cents: 2499,
    },
    LicenseTier {
        id: "mp3_no_tag",
        name: "MP3 (No Tag)",
        price_cents: 2999,
    },
    LicenseTier {
        id: "wav_no_tag",
        name: "WAV (No Tag)",
        price_cents: 3999,
    },
    LicenseTier {
        id: "wav_stems",
        name: "WAV + Stems",
        price_cents: 5799,
    },
];

pub fn find_tier(id: &str) -> Option<LicenseTier> {
    LICENSE_TIERS.iter().copied().find(|tier| tier.id == id)
}

/// "Starting at" price shown on catalog cards.
pub fn lowest_tier_price_cents() -> i64 {
    LICENSE_TIERS[0].price_cents
}
