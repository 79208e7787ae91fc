// src/signals/browser.rs
// User-Agent bot heuristic for the storefront gate

use crate::providers::BotClassifier;

/// Automation, HTTP client and scanner fragments. Any match classifies the agent as a bot.
pub const AUTOMATION_PATTERNS: &[&str] = &[
    "bot", "crawler", "spider", "scraper",
    "curl", "wget", "python", "java", "perl", "ruby",
    "go-http", "http", "scrapy", "mechanize",
    "headless", "phantom", "selenium", "webdriver",
    "postman", "insomnia", "apache-httpclient", "okhttp",
    "libwww-perl", "masscan", "nmap", "nikto",
    "sqlmap", "dirbuster", "gobuster", "burp", "zap",
    "nessus", "openvas", "acunetix", "netsparker",
    "appscan", "qualys", "rapid7", "metasploit",
    "havij", "pangolin", "sqlsus", "sqlninja",
    "w3af", "skipfish", "wapiti", "arachni",
    "lynx", "links", "w3m",
];

/// Browser engine/product fragments. Agents without any of these are treated as bots.
pub const BROWSER_PATTERNS: &[&str] = &[
    "mozilla", "chrome", "safari", "edge", "firefox", "opera", "msie",
];

/// Pattern heuristic: empty, automation-looking, or unrecognized agents are bots.
pub fn is_bot_user_agent(user_agent: &str) -> bool {
    let ua = user_agent.to_lowercase();
    if ua.is_empty() {
        return true;
    }
    if AUTOMATION_PATTERNS.iter().any(|p| ua.contains(p)) {
        return true;
    }
    !BROWSER_PATTERNS.iter().any(|p| ua.contains(p))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PatternBotClassifier;

impl BotClassifier for PatternBotClassifier {
    fn is_bot(&self, user_agent: &str) -> bool {
        is_bot_user_agent(user_agent)
    }
}
