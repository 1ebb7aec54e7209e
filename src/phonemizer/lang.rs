/// espeak-ng voice code to G2P language code.
const ESPEAK_TO_G2P: &[(&str, &str)] = &[
    ("ar", "ara"),
    ("ca", "cat"),
    ("cs", "cze"),
    ("cy", "wel-nw"),
    ("da", "dan"),
    ("de", "ger"),
    ("el", "gre"),
    ("en-gb", "eng-uk"),
    ("en-gb-x-rp", "eng-uk"),
    ("en-us", "eng-us"),
    ("es", "spa"),
    ("es-419", "spa-me"),
    ("fa", "fas"),
    ("fi", "fin"),
    ("fr", "fra"),
    ("fr-fr", "fra"),
    ("hu", "hun"),
    ("is", "ice"),
    ("it", "ita"),
    ("ka", "geo"),
    ("kk", "kaz"),
    ("lb", "ltz"),
    ("nl", "dut"),
    ("nb", "nob"),
    ("pl", "pol"),
    ("pt-br", "por-bz"),
    ("pt", "por-po"),
    ("ro", "ron"),
    ("ru", "rus"),
    ("sk", "slo"),
    ("sl", "slv"),
    ("sr", "srp"),
    ("sv", "swe"),
    ("sw", "swa"),
    ("tr", "tur"),
    ("uk", "ukr"),
    ("vi", "vie-n"),
    ("cmn", "zho-s"),
    ("zh", "zho-s"),
    ("j", "jpn"),
    ("ja", "jpn"),
    ("hi", "hin"),
];

/// G2P language code for an espeak-ng voice code.
pub fn g2p_language(espeak: &str) -> Option<&'static str> {
    ESPEAK_TO_G2P
        .iter()
        .find(|(code, _)| code.eq_ignore_ascii_case(espeak))
        .map(|&(_, g2p)| g2p)
}

/// Prefix prepended to every word fed to the G2P model, e.g. `<eng-us>:`.
pub fn language_tag(code: &str) -> String {
    if code.ends_with(':') {
        return code.to_string();
    }
    let mut tag = String::with_capacity(code.len() + 3);
    if !code.starts_with('<') {
        tag.push('<');
    }
    tag.push_str(code);
    if code.ends_with('>') {
        tag.push(':');
    } else {
        tag.push_str(">:");
    }
    tag
}
