//! System short names and their provider-specific identifiers.
//!
//! Task scopes name systems by the library's folder short name (`nes`,
//! `ps1`, ...). Each remote provider numbers systems differently; the
//! tables live here since they're third-party API details.

/// Known system short names (plus common aliases) mapped to a canonical name.
pub fn canonical_system(name: &str) -> Option<&'static str> {
    let name = name.trim().to_ascii_lowercase();
    let canonical = match name.as_str() {
        "nes" | "famicom" => "nes",
        "snes" | "sfc" | "superfamicom" => "snes",
        "n64" => "n64",
        "gamecube" | "gc" | "ngc" => "gamecube",
        "wii" => "wii",
        "wiiu" => "wiiu",
        "gb" | "gameboy" => "gb",
        "gbc" => "gbc",
        "gba" => "gba",
        "nds" | "ds" => "nds",
        "3ds" | "n3ds" => "3ds",
        "sg1000" | "sg-1000" => "sg1000",
        "sms" | "mastersystem" => "sms",
        "genesis" | "megadrive" | "md" => "genesis",
        "segacd" | "megacd" => "segacd",
        "32x" | "sega32x" => "32x",
        "saturn" => "saturn",
        "dreamcast" | "dc" => "dreamcast",
        "gamegear" | "gg" => "gamegear",
        "ps1" | "psx" => "ps1",
        "ps2" => "ps2",
        "ps3" => "ps3",
        "psp" => "psp",
        "vita" | "psvita" => "vita",
        "xbox" => "xbox",
        "xbox360" => "xbox360",
        _ => return None,
    };
    Some(canonical)
}

/// ScreenScraper system ID for a system short name.
pub fn screenscraper_system_id(system: &str) -> Option<u32> {
    let id = match canonical_system(system)? {
        // Nintendo
        "nes" => 3,
        "snes" => 4,
        "n64" => 14,
        "gamecube" => 13,
        "wii" => 16,
        "wiiu" => 18,
        "gb" => 9,
        "gbc" => 10,
        "gba" => 12,
        "nds" => 15,
        "3ds" => 17,

        // Sega
        "sg1000" => 109,
        "sms" => 2,
        "genesis" => 1,
        "segacd" => 20,
        "32x" => 19,
        "saturn" => 22,
        "dreamcast" => 23,
        "gamegear" => 21,

        // Sony
        "ps1" => 57,
        "ps2" => 58,
        "ps3" => 59,
        "psp" => 61,
        "vita" => 62,

        // Microsoft
        "xbox" => 32,
        "xbox360" => 33,
        _ => return None,
    };
    Some(id)
}

/// TheGamesDB platform ID for a system short name.
pub fn thegamesdb_platform_id(system: &str) -> Option<u32> {
    let id = match canonical_system(system)? {
        "nes" => 7,
        "snes" => 6,
        "n64" => 3,
        "gamecube" => 2,
        "wii" => 9,
        "wiiu" => 38,
        "gb" => 4,
        "gbc" => 41,
        "gba" => 5,
        "nds" => 8,
        "3ds" => 4912,
        "sg1000" => 4949,
        "sms" => 35,
        "genesis" => 18,
        "segacd" => 21,
        "32x" => 33,
        "saturn" => 17,
        "dreamcast" => 16,
        "gamegear" => 20,
        "ps1" => 10,
        "ps2" => 11,
        "ps3" => 12,
        "psp" => 13,
        "vita" => 39,
        "xbox" => 14,
        "xbox360" => 15,
        _ => return None,
    };
    Some(id)
}

/// Map a region preference to the ScreenScraper region code used for
/// names and media.
pub fn preferred_ss_region(region: &str) -> &'static str {
    match region.to_lowercase().as_str() {
        "us" | "usa" | "united states" => "us",
        "eu" | "europe" => "eu",
        "jp" | "japan" => "jp",
        "wor" | "world" => "wor",
        _ => "us",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_resolve() {
        assert_eq!(canonical_system("PSX"), Some("ps1"));
        assert_eq!(canonical_system("megadrive"), Some("genesis"));
        assert_eq!(canonical_system("atari2600"), None);
    }

    #[test]
    fn test_provider_ids() {
        assert_eq!(screenscraper_system_id("nes"), Some(3));
        assert_eq!(screenscraper_system_id("gc"), Some(13));
        assert_eq!(thegamesdb_platform_id("snes"), Some(6));
        assert_eq!(thegamesdb_platform_id("unknown"), None);
    }

    #[test]
    fn test_preferred_region_fallback() {
        assert_eq!(preferred_ss_region("Europe"), "eu");
        assert_eq!(preferred_ss_region("mars"), "us");
    }
}
