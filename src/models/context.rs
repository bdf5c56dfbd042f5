use chrono::{DateTime, Datelike, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use url::Url;

/// Environment facts about the visitor's device, captured once at startup.
/// Fields the embedding environment cannot provide stay `None` and are
/// shipped upstream as nulls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceFacts {
    pub screen_width: u32,
    pub screen_height: u32,
    pub device_memory_gb: Option<f64>,
    pub hardware_concurrency: Option<u32>,
    pub network_downlink: Option<f64>,
    pub os_type: String,
    pub timezone: String,
    pub is_working_hours: bool,
}

impl DeviceFacts {
    /// OS label derived from a user-agent string; anything unrecognized
    /// is "Other". iPhone/iPad is tested before Mac on purpose: iOS
    /// agents also contain "like Mac OS X" and would bucket as desktop
    /// otherwise.
    pub fn os_from_user_agent(user_agent: &str) -> &'static str {
        if user_agent.contains("Windows") {
            "Windows"
        } else if user_agent.contains("iPhone") || user_agent.contains("iPad") {
            "iOS"
        } else if user_agent.contains("Mac") {
            "MacOS"
        } else if user_agent.contains("Android") {
            "Android"
        } else {
            "Other"
        }
    }
}

/// Mon-Fri, 09:00-17:59 in the visitor's local time.
pub fn is_working_hours<Tz: TimeZone>(now: &DateTime<Tz>) -> bool {
    let weekday = now.weekday().number_from_monday();
    (1..=5).contains(&weekday) && (9..18).contains(&now.hour())
}

/// Campaign attribution parameters lifted from the entry URL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UtmParams {
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_content: Option<String>,
    pub yclid: Option<String>,
    pub gclid: Option<String>,
    pub fbclid: Option<String>,
}

impl UtmParams {
    pub fn from_url(url: &Url) -> Self {
        let mut params = UtmParams::default();
        for (key, value) in url.query_pairs() {
            let value = Some(value.into_owned());
            match key.as_ref() {
                "utm_source" => params.utm_source = value,
                "utm_medium" => params.utm_medium = value,
                "utm_campaign" => params.utm_campaign = value,
                "utm_content" => params.utm_content = value,
                "yclid" => params.yclid = value,
                "gclid" => params.gclid = value,
                "fbclid" => params.fbclid = value,
                _ => {}
            }
        }
        params
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrafficSource {
    Direct,
    Seo,
    Referral,
}

impl TrafficSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficSource::Direct => "Direct",
            TrafficSource::Seo => "SEO",
            TrafficSource::Referral => "Referral",
        }
    }
}

/// Page-level context captured once when the tracker starts. Attribution
/// is deliberately frozen at load; mid-page URL changes don't reattribute
/// the visit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageContext {
    pub entry_url: String,
    pub page_title: String,
    pub referrer: Option<String>,
    pub device: DeviceFacts,
    pub utm: UtmParams,
}

impl PageContext {
    pub fn capture(
        entry_url: &str,
        page_title: &str,
        referrer: Option<&str>,
        device: DeviceFacts,
    ) -> Self {
        let utm = Url::parse(entry_url)
            .map(|url| UtmParams::from_url(&url))
            .unwrap_or_default();
        Self {
            entry_url: entry_url.to_string(),
            page_title: page_title.to_string(),
            referrer: referrer
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(String::from),
            device,
            utm,
        }
    }

    /// Classifies where the visit came from: no referrer (or a same-host
    /// one) is Direct, a known search engine is SEO, anything else is a
    /// Referral.
    pub fn traffic_source(&self) -> TrafficSource {
        let referrer = match &self.referrer {
            Some(referrer) => referrer,
            None => return TrafficSource::Direct,
        };
        if let Ok(entry) = Url::parse(&self.entry_url) {
            if let Some(host) = entry.host_str() {
                if referrer.contains(host) {
                    return TrafficSource::Direct;
                }
            }
        }
        if ["google", "yandex", "bing"]
            .iter()
            .any(|engine| referrer.contains(engine))
        {
            TrafficSource::Seo
        } else {
            TrafficSource::Referral
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn utm_parsing_picks_known_keys() {
        let url = Url::parse(
            "https://site.example/landing?utm_source=yd&utm_campaign=spring&gclid=g1&other=x",
        )
        .unwrap();
        let utm = UtmParams::from_url(&url);
        assert_eq!(utm.utm_source.as_deref(), Some("yd"));
        assert_eq!(utm.utm_campaign.as_deref(), Some("spring"));
        assert_eq!(utm.gclid.as_deref(), Some("g1"));
        assert_eq!(utm.utm_medium, None);
        assert_eq!(utm.fbclid, None);
    }

    #[test]
    fn traffic_source_buckets() {
        let direct = PageContext::capture("https://site.example/", "t", None, DeviceFacts::default());
        assert_eq!(direct.traffic_source(), TrafficSource::Direct);

        let same_host = PageContext::capture(
            "https://site.example/",
            "t",
            Some("https://site.example/other"),
            DeviceFacts::default(),
        );
        assert_eq!(same_host.traffic_source(), TrafficSource::Direct);

        let seo = PageContext::capture(
            "https://site.example/",
            "t",
            Some("https://www.google.com/search"),
            DeviceFacts::default(),
        );
        assert_eq!(seo.traffic_source(), TrafficSource::Seo);

        let referral = PageContext::capture(
            "https://site.example/",
            "t",
            Some("https://blog.example/post"),
            DeviceFacts::default(),
        );
        assert_eq!(referral.traffic_source(), TrafficSource::Referral);
    }

    #[test]
    fn os_labels() {
        assert_eq!(
            DeviceFacts::os_from_user_agent("Mozilla/5.0 (Windows NT 10.0)"),
            "Windows"
        );
        assert_eq!(
            DeviceFacts::os_from_user_agent("Mozilla/5.0 (iPhone; CPU iPhone OS)"),
            "iOS"
        );
        assert_eq!(
            DeviceFacts::os_from_user_agent("Mozilla/5.0 (Macintosh; Intel Mac OS X)"),
            "MacOS"
        );
        assert_eq!(DeviceFacts::os_from_user_agent("curl/8.0"), "Other");
    }

    #[test]
    fn working_hours_window() {
        // Wednesday 10:00 UTC.
        let wednesday = Utc.with_ymd_and_hms(2024, 6, 5, 10, 0, 0).unwrap();
        assert!(is_working_hours(&wednesday));
        // Wednesday 18:00 is already outside.
        let evening = Utc.with_ymd_and_hms(2024, 6, 5, 18, 0, 0).unwrap();
        assert!(!is_working_hours(&evening));
        // Saturday noon.
        let saturday = Utc.with_ymd_and_hms(2024, 6, 8, 12, 0, 0).unwrap();
        assert!(!is_working_hours(&saturday));
    }
}
