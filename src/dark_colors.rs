/// Background colors for generated avatars, dark enough that the white
/// avatar text stays readable.
pub const DARK_COLORS: [&str; 12] = [
    "264653", "2a9d8f", "287271", "1d3557", "457b9d", "6d597a",
    "355070", "b56576", "6a040f", "9d0208", "3a5a40", "588157",
];
