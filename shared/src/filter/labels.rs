//! Human-readable names for filter keys and enumerated filter values.

use serde::{Deserialize, Serialize};

use super::state::SEARCH_KEY;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Ar,
}

struct Label {
    key: &'static str,
    en: &'static str,
    ar: &'static str,
}

const fn label(key: &'static str, en: &'static str, ar: &'static str) -> Label {
    Label { key, en, ar }
}

const FILTER_LABELS: &[Label] = &[
    label(SEARCH_KEY, "Search", "بحث"),
    label("make", "Make", "الصانع"),
    label("model", "Model", "الموديل"),
    label("year", "Year", "السنة"),
    label("overallRating", "Rating", "التقييم"),
    label("fuelType", "Fuel type", "نوع الوقود"),
    label("color", "Color", "اللون"),
    label("recommendation", "Recommendation", "التوصية"),
    label("recoveryLocation", "Recovery location", "موقع الاسترداد"),
    label("operationStatus", "Operation status", "حالة التشغيل"),
    label("warehouse", "Warehouse", "المستودع"),
];

const VALUE_LABELS: &[(&str, &[Label])] = &[
    (
        "overallRating",
        &[
            label("excellent", "Excellent", "ممتاز"),
            label("good", "Good", "جيد"),
            label("fair", "Fair", "مقبول"),
            label("poor", "Poor", "ضعيف"),
        ],
    ),
    (
        "fuelType",
        &[
            label("petrol", "Petrol", "بنزين"),
            label("diesel", "Diesel", "ديزل"),
            label("hybrid", "Hybrid", "هجين"),
            label("electric", "Electric", "كهربائي"),
        ],
    ),
    (
        "recommendation",
        &[
            label("sell_as_is", "Sell as is", "البيع كما هي"),
            label("repair_sell", "Repair then sell", "إصلاح ثم بيع"),
            label("auction", "Auction", "مزاد"),
            label("scrap", "Scrap", "تخريد"),
        ],
    ),
    (
        "operationStatus",
        &[
            label("working", "Working", "تعمل"),
            label("not_working", "Not working", "لا تعمل"),
            label("needs_maintenance", "Needs maintenance", "تحتاج صيانة"),
        ],
    ),
    (
        "warehouse",
        &[
            label("main", "Main warehouse", "المستودع الرئيسي"),
            label("east", "East warehouse", "المستودع الشرقي"),
            label("west", "West warehouse", "المستودع الغربي"),
        ],
    ),
];

fn pick(label: &Label, locale: Locale) -> &'static str {
    match locale {
        Locale::En => label.en,
        Locale::Ar => label.ar,
    }
}

/// Label for a filter key; unknown keys are shown as-is.
pub fn filter_label(key: &str, locale: Locale) -> String {
    FILTER_LABELS
        .iter()
        .find(|l| l.key == key)
        .map(|l| pick(l, locale).to_string())
        .unwrap_or_else(|| key.to_string())
}

/// Display form of a filter value; values without a translation are shown as-is.
pub fn display_value(key: &str, value: &str, locale: Locale) -> String {
    VALUE_LABELS
        .iter()
        .find(|(k, _)| *k == key)
        .and_then(|(_, values)| values.iter().find(|l| l.key == value))
        .map(|l| pick(l, locale).to_string())
        .unwrap_or_else(|| value.to_string())
}
