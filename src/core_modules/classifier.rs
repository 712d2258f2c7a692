// THEORY:
// The classifier turns a continuous NSB estimate into one of seven Bortle-like
// pollution tiers. It is a table, not a chain of conditionals: tiers are listed
// from the darkest sky (highest threshold) to the brightest, and the first tier
// whose threshold is `<=` the score wins. Thresholds are therefore closed on the
// lower bound: 21.0 is tier 1, 20.999 is tier 2.
//
// The last tier has no threshold and catches everything else, including NaN,
// which makes `classify` total over every `f64`.

use serde::Serialize;

/// One row of the pollution table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollutionTier {
    /// Minimum NSB for this tier; `None` for the catch-all.
    pub min_nsb: Option<f64>,
    pub level: &'static str,
    pub level_en: &'static str,
    pub description: &'static str,
    pub color_code: &'static str,
    pub bortle_class: u8,
    pub recommendation: &'static str,
}

/// Sorted by descending threshold.
pub static POLLUTION_TIERS: [PollutionTier; 7] = [
    PollutionTier {
        min_nsb: Some(21.0),
        level: "Çok Düşük",
        level_en: "Very Low",
        description: "Mükemmel karanlık gökyüzü. Samanyolu net görünür.",
        color_code: "#00ff00",
        bortle_class: 1,
        recommendation: "Astrofotoğraf için mükemmel koşullar!",
    },
    PollutionTier {
        min_nsb: Some(20.0),
        level: "Düşük",
        level_en: "Low",
        description: "Çok iyi gözlem koşulları. Samanyolu kolayca görünür.",
        color_code: "#7fff00",
        bortle_class: 2,
        recommendation: "Çıplak gözle gözlem için harika!",
    },
    PollutionTier {
        min_nsb: Some(19.0),
        level: "Orta-Düşük",
        level_en: "Medium-Low",
        description: "İyi gözlem koşulları. Samanyolu görülebilir.",
        color_code: "#ffff00",
        bortle_class: 3,
        recommendation: "Gözlem için uygun koşullar.",
    },
    PollutionTier {
        min_nsb: Some(18.0),
        level: "Orta",
        level_en: "Medium",
        description: "Orta derecede ışık kirliliği. Sınırlı gözlem.",
        color_code: "#ffa500",
        bortle_class: 4,
        recommendation: "Teleskop ile gözlem yapılabilir.",
    },
    PollutionTier {
        min_nsb: Some(17.0),
        level: "Orta-Yüksek",
        level_en: "Medium-High",
        description: "Belirgin ışık kirliliği. Zor gözlem koşulları.",
        color_code: "#ff6600",
        bortle_class: 5,
        recommendation: "Gelişmiş ekipman gerekli.",
    },
    PollutionTier {
        min_nsb: Some(16.0),
        level: "Yüksek",
        level_en: "High",
        description: "Yüksek ışık kirliliği. Sadece parlak cisimler görünür.",
        color_code: "#ff3300",
        bortle_class: 6,
        recommendation: "Gözlem için uygun değil.",
    },
    PollutionTier {
        min_nsb: None,
        level: "Çok Yüksek",
        level_en: "Very High",
        description: "Aşırı ışık kirliliği. Yıldız gözlemi neredeyse imkansız.",
        color_code: "#ff0000",
        bortle_class: 7,
        recommendation: "Şehir merkezi - gözlem yapmayın.",
    },
];

/// Maps an NSB score to its pollution tier.
pub fn classify(nsb: f64) -> &'static PollutionTier {
    POLLUTION_TIERS
        .iter()
        .find(|tier| tier.min_nsb.is_none_or(|min| min <= nsb))
        .unwrap_or(&POLLUTION_TIERS[POLLUTION_TIERS.len() - 1])
}
