//! Text normalizers and field extractors for noisy listing fragments.
//!
//! Every extractor is a pure `&str -> Option<T>` function (or an ordered
//! chain of them, tried left to right with first-hit-wins). Unparseable
//! input yields `None`, never an error; callers treat `None` as "leave the
//! existing value alone", never as zero.

use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use reid_core::{Availability, Currency};

pub const CRATE_NAME: &str = "reid-extract";

macro_rules! re {
    ($name:ident, $pattern:expr) => {
        static $name: LazyLock<Regex> =
            LazyLock::new(|| Regex::new($pattern).expect("valid regex"));
    };
}

// ─── Number normalization ────────────────────────────────────────────────────

re!(NUMBER_RE, r"[0-9.]+");

/// Parse a number out of locale-ambiguous text.
///
/// Separator rules: one comma and one dot together means the dot is a
/// thousands separator and the comma the decimal mark; a single comma alone
/// is the decimal mark; repeated commas or repeated dots are thousands
/// separators. `"1.500.000.000"` parses to `1_500_000_000`.
pub fn parse_number(text: &str) -> Option<f64> {
    let dots = text.matches('.').count();
    let commas = text.matches(',').count();
    let mut s = text.to_string();
    if commas == 1 && dots == 1 {
        s = s.replace('.', "").replace(',', ".");
    }
    if commas == 1 {
        s = s.replace(',', ".");
    } else if commas > 1 {
        s = s.replace(',', "");
    }
    if dots > 1 {
        s = s.replace('.', "");
    }
    let matched = NUMBER_RE.find(&s)?.as_str();
    if !matched.contains(|c: char| c.is_ascii_digit()) {
        return None;
    }
    matched.parse::<f64>().ok()
}

// ─── Currency and price ──────────────────────────────────────────────────────

re!(IDR_RE, r"(?i)\bidr\b|\brp\b|\bidr\d|\brp\s*\d");
re!(USD_RE, r"(?i)\busd\b|\busd\d");
re!(FIND_USD_RE, r"(?i)USD\s*(?P<price>[0-9.,]+)");
re!(FIND_IDR_RE, r"(?i)IDR\s*(?P<price>[0-9.,]+)");

/// Keyword-based currency detection. `IDR`/`Rp` wins over `USD` when both
/// appear, matching the source corpus where IDR is the primary quote.
pub fn detect_currency(text: &str) -> Option<Currency> {
    if IDR_RE.is_match(text) {
        Some(Currency::Idr)
    } else if USD_RE.is_match(text) {
        Some(Currency::Usd)
    } else {
        None
    }
}

/// Find a `USD <amount>` price and return it as an integer amount.
pub fn find_usd(text: &str) -> Option<i64> {
    let caps = FIND_USD_RE.captures(text)?;
    let price = caps["price"].replace(',', "");
    price
        .parse::<i64>()
        .or_else(|_| price.replace('.', "").parse::<i64>())
        .ok()
}

/// Find an `IDR <amount>` price and return it as an integer amount.
pub fn find_idr(text: &str) -> Option<i64> {
    let caps = FIND_IDR_RE.captures(text)?;
    caps["price"].replace(',', "").replace('.', "").parse::<i64>().ok()
}

re!(SLASH_RE, r"/");
re!(WS_RE, r"\s+");
re!(TRAILING_PER_RE, r"per$|-$");
re!(LEADING_RP_RE, r"^rp\.?");
re!(RUPIAH_RE, r"rupia$|rupiah|bersih");
re!(TRAILING_00_RE, r"\.00$");
re!(PER_M_END_RE, r"per m$");
re!(PER_METER_RE, r"per(.*?)meter");
re!(JUTA_PER_METER_RE, r"juta(.*?)per(.*?)meter");
re!(METER_TYPO_RE, r"mete$|meteer");
re!(PER_TAHUN_RE, r"per\s*tahun");
re!(NEGO_RE, r"nego|neg$");
re!(PUNCT_RE, r"[_()]");

/// Scrub price text into a predictable shape before numeric recovery:
/// slashes become "per", currency words and haggling noise are dropped,
/// `m2` unifies to `meter`, and only the part before a dash range survives.
pub fn clean_price_text(value: &str) -> String {
    let mut v = value.to_lowercase();
    v = SLASH_RE.replace_all(&v, " per ").into_owned();
    v = WS_RE.replace_all(&v, " ").into_owned();
    v = TRAILING_PER_RE.replace_all(&v, "").into_owned();
    v = LEADING_RP_RE.replace_all(&v, "").into_owned();
    v = RUPIAH_RE.replace_all(&v, "").into_owned();
    v = TRAILING_00_RE.replace_all(&v, ",00").into_owned();
    v = v.replace("m2", "meter");
    v = PER_M_END_RE.replace_all(&v, "permeter").into_owned();
    v = PER_METER_RE.replace_all(&v, "permeter").into_owned();
    v = JUTA_PER_METER_RE.replace_all(&v, "juta permeter").into_owned();
    v = v.replace("jjuta", "juta");
    v = METER_TYPO_RE.replace_all(&v, "meter").into_owned();
    v = PER_TAHUN_RE.replace_all(&v, "pertahun").into_owned();
    v = v.replace("pertahun", "");
    v = NEGO_RE.replace_all(&v, "").into_owned();
    v = PUNCT_RE.replace_all(&v, "").into_owned();
    v = v.split('-').next().unwrap_or_default().to_string();
    v.trim().to_string()
}

re!(BILLION_RE, r"[0-9.,]+\s*m");
re!(PLAIN_NUMBER_RE, r"[0-9.,]+");
re!(LETTER_RE, r"[a-z]");
re!(JUTA_RE, r"[0-9.,]+\s*(juta|jt)$");
re!(RIBU_RE, r"(?P<price>[0-9.,]+)(.*?)ribu$");
re!(PER_METER_PRICE_RE, r"(?P<price>[0-9.,]+)\s*per\s*meter");
re!(JUTA_PER_METER_PRICE_RE, r"(?P<price>[0-9.,]+)\s*(juta|jt)\s*per\s*meter");
re!(RIBU_PER_METER_PRICE_RE, r"(?P<price>[0-9.,]+)\s*(ribu|rb)\s*per\s*meter");

/// Recover an integer price from free text, expanding the vernacular
/// multipliers: `m` (milyar, x10^9), `juta`/`jt` (x10^6), `ribu`/`rb`
/// (x10^3), with and without a `per meter` suffix. Strategies run in fixed
/// order; the first hit wins.
pub fn recover_price(value: &str) -> Option<i64> {
    let text = clean_price_text(value);

    if let Some(m) = BILLION_RE.find(&text) {
        let w = m.as_str();
        if w.starts_with(|c: char| c.is_ascii_digit()) {
            if let Some(n) = parse_number(w) {
                return Some((n * 1e9) as i64);
            }
        }
    }
    if let Some(m) = PLAIN_NUMBER_RE.find(&text) {
        if !LETTER_RE.is_match(&text) {
            if let Some(n) = parse_number(m.as_str()) {
                return Some(n as i64);
            }
        }
    }
    if let Some(m) = JUTA_RE.find(&text) {
        let w = m.as_str();
        if w.starts_with(|c: char| c.is_ascii_digit()) {
            if let Some(n) = parse_number(w) {
                return Some((n * 1e6) as i64);
            }
        }
    }
    if let Some(caps) = RIBU_RE.captures(&text) {
        if let Some(n) = parse_number(&caps["price"]) {
            return Some((n * 1e3) as i64);
        }
    }
    if let Some(caps) = PER_METER_PRICE_RE.captures(&text) {
        if let Some(n) = parse_number(&caps["price"]) {
            return Some(n as i64);
        }
    }
    if let Some(caps) = JUTA_PER_METER_PRICE_RE.captures(&text) {
        if let Some(n) = parse_number(&caps["price"]) {
            return Some((n * 1e6) as i64);
        }
    }
    if let Some(caps) = RIBU_PER_METER_PRICE_RE.captures(&text) {
        if let Some(n) = parse_number(&caps["price"]) {
            return Some((n * 1e3) as i64);
        }
    }
    None
}

re!(PER_UNIT_RE, r"/\w+");

/// Expand a per-are unit price into a parcel total when the land size is
/// known. The land size is assumed to be in square meters.
pub fn price_per_are_total(price_text: &str, unit_price: i64, land_size: f64) -> Option<i64> {
    let divider: Vec<&str> = PER_UNIT_RE.find_iter(price_text).map(|m| m.as_str()).collect();
    let divider = divider.join(" ");
    if divider.contains("are") && land_size > 0.0 {
        let per_are = land_size / 100.0;
        return Some((unit_price as f64 * per_are) as i64);
    }
    None
}

/// "Price on request" style listings carry no usable amount.
pub fn is_price_on_request(text: &str) -> bool {
    text.to_lowercase().contains("price request")
}

// ─── Sizes ───────────────────────────────────────────────────────────────────

re!(ARE_RE, r"(?i)(?P<are>[0-9.,]+)\s*are");

/// Normalize a size fragment to square meters: an `are` suffix multiplies
/// by 100, anything else goes through [`parse_number`].
pub fn size_to_sqm(text: &str) -> Option<f64> {
    if let Some(caps) = ARE_RE.captures(text) {
        let raw = caps["are"].replace(',', ".");
        return raw.parse::<f64>().ok().map(|v| (v * 100.0).trunc());
    }
    parse_number(text)
}

static LAND_SIZE_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(land size|luas tanah|land area|total area).*?(?P<size>[0-9.,]+)\s*(m2|sqm|sq\. meter|square meter|are)",
        r"(?P<size>[0-9.,]+)\s*(sqm of land|square meter(s)? of land|sqm|are)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

static BUILD_SIZE_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"build(ing)? size.*?(?P<size>[0-9.,]+)\s*(m2|m²|sqm|are)?",
        r"build(ing)?\s*(?P<size>[0-9.,]+)\s*(m2|m²|sqm|are)?",
        r"(?P<size>[0-9.,]+)\s*(sqm built area|square meter(s)? build|sqm|are)",
        r"(?P<size>[0-9.,]+) sqm building size",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

fn find_size(text: &str, patterns: &[Regex]) -> Option<f64> {
    for pattern in patterns {
        let Some(caps) = pattern.captures(text) else {
            continue;
        };
        let raw = &caps["size"];
        if !raw.contains(|c: char| c.is_ascii_digit()) {
            continue;
        }
        let value = raw
            .replace(',', ".")
            .parse::<f64>()
            .or_else(|_| raw.replace(',', "").parse::<f64>());
        let Ok(value) = value else {
            continue;
        };
        let whole_match = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        if whole_match.ends_with("are") {
            return Some(value * 100.0);
        }
        return Some(value);
    }
    None
}

/// Land size in square meters from free text.
pub fn find_land_size(description: &str) -> Option<f64> {
    find_size(&description.to_lowercase(), &LAND_SIZE_RES)
}

/// Building size in square meters from free text.
pub fn find_build_size(description: &str) -> Option<f64> {
    find_size(&description.to_lowercase(), &BUILD_SIZE_RES)
}

// ─── Lease years ─────────────────────────────────────────────────────────────

re!(EXPIRY_YEAR_RE, r"\b(2\d{3})\b");
re!(SUFFIXED_COUNT_RE, r"\b(\d{1,2})\s*year");
re!(TWO_DIGIT_RE, r"\b\d{1,2}\b");
re!(FOUR_DIGIT_RE, r"\b\d{4}\b");
re!(DIGIT_GROUP_RE, r"[0-9,.]+");
re!(SEPARATOR_RE, r"[,.]");
re!(BAHASA_LEASE_RE, r"(?i)harga(.*?)\d{1,2}(.*?)(utk|untuk)(.*?)(?P<years>\d{1,2})\s*tahun");

/// Years remaining on a lease, recovered from free text.
///
/// Four strategies run in fixed priority order; the first to produce a
/// positive integer wins, regardless of which would yield the larger value.
/// All expiry years are converted relative to `today`, since the field
/// denotes years *remaining*.
#[derive(Debug, Clone, Copy)]
pub struct LeaseYearsExtractor {
    today: NaiveDate,
}

impl LeaseYearsExtractor {
    pub fn new(today: NaiveDate) -> Self {
        Self { today }
    }

    pub fn extract(&self, text: &str) -> Option<u32> {
        let chain: [fn(&Self, &str) -> Option<u32>; 4] = [
            Self::expiry_year,
            Self::suffixed_count,
            Self::sentence_scan,
            Self::bahasa_pattern,
        ];
        let lower = text.to_lowercase();
        chain.iter().find_map(|strategy| strategy(self, &lower).filter(|y| *y > 0))
    }

    /// Strategy 1: a four-digit future year in lease/year context.
    fn expiry_year(&self, text: &str) -> Option<u32> {
        if !text.contains("lease") && !text.contains("year") {
            return None;
        }
        let current = self.today.year();
        for caps in EXPIRY_YEAR_RE.captures_iter(text) {
            let year: i32 = caps[1].parse().ok()?;
            if year > current {
                return Some((year - current) as u32);
            }
        }
        None
    }

    /// Strategy 2: a one/two-digit count directly suffixed with "year(s)".
    fn suffixed_count(&self, text: &str) -> Option<u32> {
        let caps = SUFFIXED_COUNT_RE.captures(text)?;
        caps[1].parse().ok()
    }

    /// Strategy 3: sentence-by-sentence scan collecting both expiry years
    /// (as remaining deltas) and bare two-digit counts, keeping the maximum.
    fn sentence_scan(&self, text: &str) -> Option<u32> {
        let current = self.today.year();
        let mut years: Vec<i64> = Vec::new();
        for line in text.split('\n') {
            for sentence in line.split('.') {
                if !sentence.contains("year") && !sentence.contains("lease") {
                    continue;
                }
                let purified = purify_numbers(sentence);
                for m in FOUR_DIGIT_RE.find_iter(&purified) {
                    if !m.as_str().starts_with('2') {
                        continue;
                    }
                    if let Ok(year) = m.as_str().parse::<i64>() {
                        years.push(year - i64::from(current));
                    }
                }
                if sentence.contains("year") {
                    for m in TWO_DIGIT_RE.find_iter(&purified) {
                        if let Ok(n) = m.as_str().parse::<i64>() {
                            years.push(n);
                        }
                    }
                }
            }
        }
        years.into_iter().max().filter(|y| *y > 0).map(|y| y as u32)
    }

    /// Strategy 4: bahasa phrasing "harga ... untuk N tahun".
    fn bahasa_pattern(&self, text: &str) -> Option<u32> {
        let flat = text.replace('\n', " ");
        let caps = BAHASA_LEASE_RE.captures(&flat)?;
        caps["years"].parse().ok()
    }
}

/// Strip thousand separators inside digit groups so four-digit years survive
/// the word-boundary scan.
fn purify_numbers(text: &str) -> String {
    let mut out = text.to_string();
    for m in DIGIT_GROUP_RE.find_iter(text) {
        let cleaned = SEPARATOR_RE.replace_all(m.as_str(), "").into_owned();
        out = out.replace(m.as_str(), &cleaned);
    }
    out
}

// ─── Bedrooms ────────────────────────────────────────────────────────────────

re!(BEDROOMS_RE, r"(?i)(\d{1,2}) bedroom(s)?");
re!(BEDROOM_SNIPPET_RE, r"\b\d{1,2}.*?bedroom");
re!(SMALL_INT_RE, r"\d{1,2}");

/// Direct `N bedroom(s)` match.
pub fn find_bedrooms(text: &str) -> Option<u32> {
    let caps = BEDROOMS_RE.captures(text)?;
    caps[1].parse().ok()
}

/// Free-text fallback: when several numbers crowd the word "bedroom", pick
/// the one at minimum textual distance from it.
pub fn find_bedrooms_in_text(text: &str) -> Option<u32> {
    let lower = text.to_ascii_lowercase();
    if !lower.contains("bedroom") {
        return None;
    }
    let snippet = BEDROOM_SNIPPET_RE.find(&lower)?.as_str();
    let bedroom_at = snippet.find("bedroom")?;
    let mut best: Option<(usize, u32)> = None;
    for m in SMALL_INT_RE.find_iter(snippet) {
        if m.start() >= bedroom_at {
            break;
        }
        let Ok(value) = m.as_str().parse::<u32>() else {
            continue;
        };
        let distance = bedroom_at - m.start();
        if best.map(|(d, _)| distance < d).unwrap_or(true) {
            best = Some((distance, value));
        }
    }
    best.map(|(_, value)| value)
}

// ─── Contract and property type ──────────────────────────────────────────────

re!(CONTRACT_RE, r"(?i)leasehold|freehold");

/// Keyword match for the contract type, title-cased.
pub fn find_contract_type(text: &str) -> Option<String> {
    CONTRACT_RE.find(text).map(|m| title_case(m.as_str()))
}

/// Contract type with the corpus default: no keyword means Freehold.
pub fn contract_type_or_default(text: &str) -> String {
    find_contract_type(text).unwrap_or_else(|| "Freehold".to_string())
}

const PROPERTY_TYPE_KEYWORDS: &[(&str, &str)] = &[
    ("apartment", "Apartment"),
    ("apartement", "Apartment"),
    ("townhouse", "Townhouse"),
    ("hotel", "Hotel"),
    ("land", "Land"),
    ("loft", "Loft"),
    ("plot", "Land"),
    ("house", "House"),
    ("home", "House"),
    ("commercial", "Commercial"),
    ("villa", "Villa"),
];

/// Ordered keyword classification over the fixed property vocabulary.
/// First match wins; no keyword yields the explicit default.
pub fn detect_property_type(text: &str, default: &str) -> String {
    let lower = text.to_lowercase();
    for (keyword, label) in PROPERTY_TYPE_KEYWORDS {
        if lower.contains(keyword) {
            return (*label).to_string();
        }
    }
    default.to_string()
}

re!(STD_LAND_RE, r"(?i)land");
re!(STD_TOWNHOUSE_RE, r"(?i)townhouse");
re!(STD_HOUSE_RE, r"(?i)house|home");
re!(STD_APARTMENT_RE, r"(?i)apartment|apartement");
re!(STD_COMMERCIAL_RE, r"(?i)commercial");
re!(STD_HOTEL_RE, r"(?i)^hotel");
re!(STD_VILLA_RE, r"(?i)villa");

/// Canonicalize an already-selected property type value ("Villa for Sale",
/// "apartement", ...) onto the known vocabulary, leaving unknown values
/// intact for validation to flag.
pub fn standardize_property_type(value: &str) -> String {
    let standardized = if STD_LAND_RE.is_match(value) {
        "Land"
    } else if STD_TOWNHOUSE_RE.is_match(value) {
        "Townhouse"
    } else if STD_HOUSE_RE.is_match(value) {
        "House"
    } else if STD_APARTMENT_RE.is_match(value) {
        "Apartment"
    } else if STD_COMMERCIAL_RE.is_match(value) {
        "Commercial"
    } else if STD_HOTEL_RE.is_match(value) {
        "Hotel"
    } else if STD_VILLA_RE.is_match(value) {
        "Villa"
    } else {
        value
    };
    standardized.replace(" for Sale", "")
}

// ─── Location ────────────────────────────────────────────────────────────────

re!(LOCATION_LABEL_RE, r"location:\s*(\w+)\b");
re!(LOCATION_IN_TITLE_RE, r"(?i)\bin (\w+)");

/// `location: <word>` in the description, original casing preserved.
pub fn find_location_in_description(description: &str) -> Option<String> {
    let lower = description.to_ascii_lowercase();
    let caps = LOCATION_LABEL_RE.captures(&lower)?;
    let needle = caps.get(1)?.as_str();
    let at = lower.find(needle)?;
    description.get(at..at + needle.len()).map(str::to_string)
}

/// `in <Place>` in the title.
pub fn find_location_in_title(title: &str) -> Option<String> {
    let caps = LOCATION_IN_TITLE_RE.captures(title)?;
    Some(title_case(caps.get(1)?.as_str()))
}

// ─── Dates ───────────────────────────────────────────────────────────────────

re!(DATE_DASHED_RE, r"(?P<year>\d{4})-(?P<month>\d{2})-(?P<day>\d{2})");
re!(DATE_COMPACT_RE, r"(?P<year>\d{4})(?P<month>\d{2})(?P<day>\d{2})");
re!(DATE_PATH_RE, r"(?P<year>\d{4})/(?P<month>\d{2})/");
re!(YEAR_20XX_RE, r"^20\d{2}$");

/// Listing date from `YYYY-MM-DD`, compact `YYYYMMDD`, or partial `YYYY/MM/`
/// fragments. A parsed month above 12 is treated as swapped month/day.
pub fn parse_listed_date(src: &str) -> Option<NaiveDate> {
    let patterns: [(&Regex, bool); 3] = [
        (&DATE_DASHED_RE, true),
        (&DATE_COMPACT_RE, true),
        (&DATE_PATH_RE, false),
    ];
    for (pattern, has_day) in patterns {
        let Some(caps) = pattern.captures(src) else {
            continue;
        };
        let year = &caps["year"];
        if !YEAR_20XX_RE.is_match(year) {
            continue;
        }
        let year: i32 = year.parse().ok()?;
        let mut month: u32 = caps["month"].parse().ok()?;
        let mut day: u32 = if has_day { caps["day"].parse().ok()? } else { 1 };
        if month > 12 {
            std::mem::swap(&mut month, &mut day);
        }
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return Some(date);
        }
    }
    None
}

// ─── Availability labels ─────────────────────────────────────────────────────

/// Collapse availability labels: any mention of "sold" wins, then
/// "delisted", else the listing is still available.
pub fn availability_from_labels(labels: &[String]) -> Availability {
    if labels.iter().any(|l| l.to_lowercase().contains("sold")) {
        Availability::Sold
    } else if labels.iter().any(|l| l.to_lowercase().contains("delisted")) {
        Availability::Delisted
    } else {
        Availability::Available
    }
}

// ─── Off-plan ────────────────────────────────────────────────────────────────

re!(OFF_PLAN_RE, r"(?i)\boff[\s\d\w]+plan\b");

const OFF_PLAN_KEYWORDS: &[&str] = &["off plan", "offplan", "off-plan", "under construction"];

/// Collapse "off ... plan" spacing variants to the canonical token.
pub fn normalize_off_plan(text: &str) -> String {
    OFF_PLAN_RE.replace_all(text, "off-plan").into_owned()
}

/// Keyword check after normalization.
pub fn has_off_plan(text: &str) -> bool {
    let lower = text.trim().to_lowercase();
    OFF_PLAN_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Off-plan detection across title, description, and source labels.
pub fn detect_off_plan(title: Option<&str>, description: Option<&str>, labels: &[String]) -> bool {
    let mut haystacks: Vec<String> = Vec::new();
    if let Some(title) = title {
        haystacks.push(normalize_off_plan(title));
    }
    if let Some(description) = description {
        haystacks.push(normalize_off_plan(description));
    }
    haystacks.extend(labels.iter().map(|l| normalize_off_plan(l)));
    haystacks.iter().any(|h| has_off_plan(h))
}

// ─── Land zoning ─────────────────────────────────────────────────────────────

const ZONING_COLORS: &[(&str, &str)] = &[
    ("yellow", "Residential"),
    ("red", "Commercial"),
    ("pink", "Tourism"),
    ("green", "Agricultural"),
    ("dark green", "Green"),
    ("orange", "Sacred"),
    ("grey", "Industrial"),
    ("blue", "Special"),
];

const ZONING_CATEGORIES: &[(&str, &str)] = &[
    ("residential", "Residential"),
    ("commercial", "Commercial"),
    ("tourism", "Tourism"),
];

re!(COLON_NEWLINES_RE, r"\n:+\n");
re!(AFTER_COLON_RE, r":\n+");
re!(ZONING_LINE_RE, r"^zoning");

/// Zoning designation for land parcels: sentences opening with "zoning" are
/// checked against zone colors first, then zoning categories.
pub fn find_land_zoning(description: &str) -> Option<String> {
    let text = description.to_lowercase();
    let text = COLON_NEWLINES_RE.replace_all(&text, ":").into_owned();
    let text = AFTER_COLON_RE.replace_all(&text, ": ").into_owned();
    let mut sentences: Vec<&str> = Vec::new();
    for line in text.split('\n') {
        sentences.extend(line.split('.'));
    }
    let zoning_sentences: Vec<&str> = sentences
        .into_iter()
        .filter(|s| ZONING_LINE_RE.is_match(s))
        .collect();
    for (color, zone) in ZONING_COLORS {
        if zoning_sentences.iter().any(|s| s.contains(color)) {
            return Some((*zone).to_string());
        }
    }
    for (category, zone) in ZONING_CATEGORIES {
        if zoning_sentences.iter().any(|s| s.contains(category)) {
            return Some((*zone).to_string());
        }
    }
    None
}

// ─── Misc normalizers ────────────────────────────────────────────────────────

/// Collapse runs of whitespace to single spaces.
pub fn remove_whitespace(value: &str) -> String {
    WS_RE.replace_all(value, " ").trim().to_string()
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 15).unwrap()
    }

    #[test]
    fn parse_number_handles_separator_ambiguity() {
        assert_eq!(parse_number("1.500.000.000"), Some(1_500_000_000.0));
        assert_eq!(parse_number("1,500,000"), Some(1_500_000.0));
        assert_eq!(parse_number("3,5"), Some(3.5));
        assert_eq!(parse_number("1.500,50"), Some(1500.5));
        assert_eq!(parse_number("no digits"), None);
    }

    #[test]
    fn idr_price_scenario() {
        let text = "IDR 1.500.000.000";
        assert_eq!(detect_currency(text), Some(Currency::Idr));
        assert_eq!(find_idr(text), Some(1_500_000_000));
    }

    #[test]
    fn usd_price_with_thousands() {
        assert_eq!(find_usd("USD 250,000"), Some(250_000));
        assert_eq!(detect_currency("USD 250,000"), Some(Currency::Usd));
        assert_eq!(find_usd("just words"), None);
    }

    #[test]
    fn rp_prefix_detects_idr() {
        assert_eq!(detect_currency("Rp 2.500.000.000"), Some(Currency::Idr));
        assert_eq!(detect_currency("Rp2500000"), Some(Currency::Idr));
    }

    #[test]
    fn recover_price_expands_vernacular_multipliers() {
        assert_eq!(recover_price("1,5 M"), Some(1_500_000_000));
        assert_eq!(recover_price("Rp 500 juta"), Some(500_000_000));
        assert_eq!(recover_price("750 ribu"), Some(750_000));
        assert_eq!(recover_price("2.500.000.000"), Some(2_500_000_000));
        assert_eq!(recover_price("contact agent"), None);
    }

    #[test]
    fn per_are_price_expands_against_land_size() {
        // 10 juta per are on a 500 sqm (5 are) parcel
        assert_eq!(price_per_are_total("10jt/are", 10_000_000, 500.0), Some(50_000_000));
        assert_eq!(price_per_are_total("10jt", 10_000_000, 500.0), None);
    }

    #[test]
    fn are_sizes_convert_to_sqm() {
        assert_eq!(size_to_sqm("3.5 are"), Some(350.0));
        assert_eq!(size_to_sqm("7 are"), Some(700.0));
        assert_eq!(size_to_sqm("240 m2"), Some(240.0));
    }

    #[test]
    fn land_size_found_in_description() {
        assert_eq!(find_land_size("Land size: 450 sqm with garden"), Some(450.0));
        assert_eq!(find_land_size("total area of 4,5 are"), Some(450.0));
        assert_eq!(find_land_size("no sizes here"), None);
    }

    #[test]
    fn build_size_found_in_description() {
        assert_eq!(find_build_size("Building size 180 m2"), Some(180.0));
        assert_eq!(find_build_size("200 sqm built area"), Some(200.0));
    }

    #[test]
    fn lease_years_from_expiry_year() {
        let extractor = LeaseYearsExtractor::new(today());
        assert_eq!(extractor.extract("leasehold until 2045"), Some(20));
    }

    #[test]
    fn lease_years_from_suffixed_count() {
        let extractor = LeaseYearsExtractor::new(today());
        assert_eq!(extractor.extract("25 years lease remaining"), Some(25));
    }

    #[test]
    fn lease_chain_priority_is_deterministic() {
        // Both an expiry year (strategy 1 => 20) and a 99-year count
        // (strategy 2) are present; strategy order wins, not magnitude.
        let extractor = LeaseYearsExtractor::new(today());
        assert_eq!(extractor.extract("lease until 2045, extendable by 99 years"), Some(20));
    }

    #[test]
    fn lease_years_from_bahasa_phrase() {
        let extractor = LeaseYearsExtractor::new(today());
        assert_eq!(extractor.extract("harga 2 milyar untuk 30 tahun"), Some(30));
    }

    #[test]
    fn lease_years_absent_yields_none() {
        let extractor = LeaseYearsExtractor::new(today());
        assert_eq!(extractor.extract("beautiful villa with pool"), None);
    }

    #[test]
    fn bedrooms_direct_match() {
        assert_eq!(find_bedrooms("3 bedroom villa"), Some(3));
        assert_eq!(find_bedrooms("12 Bedrooms"), Some(12));
        assert_eq!(find_bedrooms("open plan living"), None);
    }

    #[test]
    fn bedrooms_proximity_tiebreak() {
        // 2 pools is further from "bedroom" than 4
        assert_eq!(find_bedrooms_in_text("villa with 2 pools and 4 spacious bedrooms"), Some(4));
    }

    #[test]
    fn contract_type_defaults_to_freehold() {
        assert_eq!(find_contract_type("25 year leasehold"), Some("Leasehold".into()));
        assert_eq!(contract_type_or_default("FREEHOLD title"), "Freehold");
        assert_eq!(contract_type_or_default("no tenure given"), "Freehold");
    }

    #[test]
    fn property_type_keyword_order() {
        assert_eq!(detect_property_type("Stunning villa on a land plot", "Villa"), "Land");
        assert_eq!(detect_property_type("Family home in Ubud", "Villa"), "House");
        assert_eq!(detect_property_type("nothing known", "Villa"), "Villa");
    }

    #[test]
    fn property_type_standardization() {
        assert_eq!(standardize_property_type("Villa for Sale"), "Villa");
        assert_eq!(standardize_property_type("apartement"), "Apartment");
        assert_eq!(standardize_property_type("Castle"), "Castle");
    }

    #[test]
    fn location_from_description_preserves_casing() {
        assert_eq!(
            find_location_in_description("Prime spot. Location: Canggu, near the beach"),
            Some("Canggu".into())
        );
        assert_eq!(find_location_in_description("no hints"), None);
    }

    #[test]
    fn location_from_title() {
        assert_eq!(find_location_in_title("Charming villa in seminyak"), Some("Seminyak".into()));
    }

    #[test]
    fn listed_dates_parse_and_swap() {
        assert_eq!(
            parse_listed_date("2023-12-01"),
            NaiveDate::from_ymd_opt(2023, 12, 1)
        );
        assert_eq!(
            parse_listed_date("uploads/20231201_photo.jpg"),
            NaiveDate::from_ymd_opt(2023, 12, 1)
        );
        assert_eq!(
            parse_listed_date("/2023/11/"),
            NaiveDate::from_ymd_opt(2023, 11, 1)
        );
        // month 25 can only be a day
        assert_eq!(
            parse_listed_date("2023-25-04"),
            NaiveDate::from_ymd_opt(2023, 4, 25)
        );
        assert_eq!(parse_listed_date("none"), None);
    }

    #[test]
    fn availability_prefers_sold_over_delisted() {
        let labels = vec!["Recently DELISTED".to_string(), "SOLD out".to_string()];
        assert_eq!(availability_from_labels(&labels), Availability::Sold);
        assert_eq!(
            availability_from_labels(&["delisted".to_string()]),
            Availability::Delisted
        );
        assert_eq!(availability_from_labels(&[]), Availability::Available);
    }

    #[test]
    fn off_plan_spacing_variants_collapse() {
        assert!(detect_off_plan(Some("Off    Plan villa"), None, &[]));
        assert!(detect_off_plan(None, Some("currently under construction"), &[]));
        assert!(!detect_off_plan(Some("Completed villa"), Some("move-in ready"), &[]));
    }

    #[test]
    fn land_zoning_from_description() {
        assert_eq!(
            find_land_zoning("Great plot.\nZoning: yellow\nClose to beach"),
            Some("Residential".into())
        );
        assert_eq!(
            find_land_zoning("zoning is tourism here"),
            Some("Tourism".into())
        );
        assert_eq!(find_land_zoning("no zone mentioned"), None);
    }
}
