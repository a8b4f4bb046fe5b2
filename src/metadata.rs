//! Presentation metadata attached to each registered peer.
//!
//! None of this affects routing; it only feeds the peer list so clients can
//! render something friendlier than a connection ID.

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

/// Animal avatars handed out at registration (emoji, name)
const ANIMALS: &[(&str, &str)] = &[
    ("🐶", "Dog"),
    ("🐱", "Cat"),
    ("🐭", "Mouse"),
    ("🐹", "Hamster"),
    ("🐰", "Rabbit"),
    ("🦊", "Fox"),
    ("🐻", "Bear"),
    ("🐼", "Panda"),
    ("🐨", "Koala"),
    ("🐯", "Tiger"),
    ("🦁", "Lion"),
    ("🐮", "Cow"),
    ("🐷", "Pig"),
    ("🐸", "Frog"),
    ("🐵", "Monkey"),
    ("🐧", "Penguin"),
    ("🦆", "Duck"),
    ("🦅", "Eagle"),
    ("🦉", "Owl"),
    ("🐺", "Wolf"),
    ("🐴", "Horse"),
    ("🦄", "Unicorn"),
    ("🐝", "Bee"),
    ("🦋", "Butterfly"),
    ("🐢", "Turtle"),
    ("🐙", "Octopus"),
    ("🦀", "Crab"),
    ("🐳", "Whale"),
    ("🐬", "Dolphin"),
    ("🦈", "Shark"),
    ("🐘", "Elephant"),
    ("🦒", "Giraffe"),
    ("🦘", "Kangaroo"),
    ("🦥", "Sloth"),
    ("🦦", "Otter"),
    ("🦝", "Raccoon"),
    ("🦩", "Flamingo"),
    ("🦜", "Parrot"),
    ("🦔", "Hedgehog"),
    ("🐉", "Dragon"),
];

/// Opaque presentation fields for a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerMetadata {
    pub ip: String,
    pub avatar: String,
    pub animal_name: String,
    pub device: String,
    pub device_icon: String,
}

impl PeerMetadata {
    /// Build metadata from what the relay sees during the handshake
    pub fn from_handshake(
        remote_addr: SocketAddr,
        forwarded_for: Option<&str>,
        real_ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Self {
        let (avatar, animal_name) = random_animal();
        let device = DeviceInfo::from_user_agent(user_agent.unwrap_or_default());

        Self {
            ip: client_ip(remote_addr, forwarded_for, real_ip),
            avatar: avatar.to_string(),
            animal_name: animal_name.to_string(),
            device: device.name.to_string(),
            device_icon: device.icon.to_string(),
        }
    }

    /// Display name given to a freshly registered peer
    pub fn default_display_name(&self, short_id: &str) -> String {
        format!("{} {}", self.animal_name, short_id)
    }
}

fn random_animal() -> (&'static str, &'static str) {
    *ANIMALS
        .choose(&mut rand::thread_rng())
        .unwrap_or(&("🐾", "Pet"))
}

/// Resolve the client address, preferring proxy headers
pub fn client_ip(remote_addr: SocketAddr, forwarded_for: Option<&str>, real_ip: Option<&str>) -> String {
    if let Some(first) = forwarded_for
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        return first.to_string();
    }

    if let Some(real_ip) = real_ip.map(str::trim).filter(|value| !value.is_empty()) {
        return real_ip.to_string();
    }

    match remote_addr.ip() {
        IpAddr::V6(v6) if v6.is_loopback() => "127.0.0.1".to_string(),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.to_string(),
            None => v6.to_string(),
        },
        IpAddr::V4(v4) => v4.to_string(),
    }
}

/// Coarse device classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: &'static str,
    pub icon: &'static str,
}

impl DeviceInfo {
    pub fn from_user_agent(user_agent: &str) -> Self {
        let ua = user_agent.to_lowercase();
        let (name, icon) = if ua.is_empty() {
            ("Unknown", "💻")
        } else if ua.contains("iphone") {
            ("iPhone", "📱")
        } else if ua.contains("ipad") {
            ("iPad", "📱")
        } else if ua.contains("android") {
            if ua.contains("mobile") {
                ("Android", "📱")
            } else {
                ("Android Tablet", "📱")
            }
        } else if ua.contains("macintosh") || ua.contains("mac os") {
            ("Mac", "💻")
        } else if ua.contains("windows") {
            ("Windows PC", "🖥️")
        } else if ua.contains("cros") {
            ("Chromebook", "💻")
        } else if ua.contains("linux") {
            ("Linux", "🐧")
        } else {
            ("Unknown Device", "💻")
        };

        Self { name, icon }
    }
}
