//! British National Grid (EPSG:27700): projection from WGS84 and Ordnance Survey grid
//! references.
//!
//! The datum shift is the published 7-parameter Helmert transform from WGS84 to OSGB36,
//! which is good to a few metres. That is plenty for choosing 5km tiles.
use crate::error::FetchError;
use anyhow::Result;
use geo::{coord, Coord, Rect};
use regex::Regex;

pub const EPSG: u32 = 27700;

/// Size of the EA's tiles: a quarter of a 10km square.
pub const TILE_SIZE: f64 = 5_000.;

// The lettered squares cover 0-700km east and 0-1300km north of false origin
pub const GRID_WIDTH: f64 = 700_000.;
pub const GRID_HEIGHT: f64 = 1_300_000.;

pub fn grid_extent() -> Rect<f64> {
    Rect::new(coord! { x: 0., y: 0. }, coord! { x: GRID_WIDTH, y: GRID_HEIGHT })
}

struct Ellipsoid {
    a: f64,
    b: f64,
}

impl Ellipsoid {
    fn e2(self: &Self) -> f64 {
        1. - (self.b * self.b) / (self.a * self.a)
    }
}

const WGS84: Ellipsoid = Ellipsoid {
    a: 6_378_137.0,
    b: 6_356_752.314_245,
};

const AIRY_1830: Ellipsoid = Ellipsoid {
    a: 6_377_563.396,
    b: 6_356_256.909,
};

// WGS84 -> OSGB36: translations in metres, scale in ppm, rotations in arc seconds
const TX: f64 = -446.448;
const TY: f64 = 125.157;
const TZ: f64 = -542.060;
const S_PPM: f64 = 20.4894;
const RX_SEC: f64 = -0.1502;
const RY_SEC: f64 = -0.2470;
const RZ_SEC: f64 = -0.8421;

// National Grid transverse Mercator
const F0: f64 = 0.999_601_271_7;
const LAT0_DEG: f64 = 49.;
const LON0_DEG: f64 = -2.;
const E0: f64 = 400_000.;
const N0: f64 = -100_000.;

/// Project a WGS84 longitude/latitude (degrees) to National Grid easting/northing (metres).
pub fn wgs84_to_bng(lon: f64, lat: f64) -> Coord<f64> {
    let (x, y, z) = to_cartesian(&WGS84, lat.to_radians(), lon.to_radians());
    let (x, y, z) = helmert_to_osgb36(x, y, z);
    let (lat, lon) = to_geodetic(&AIRY_1830, x, y, z);
    osgb36_to_grid(lat.to_degrees(), lon.to_degrees())
}

fn to_cartesian(ellipsoid: &Ellipsoid, phi: f64, lambda: f64) -> (f64, f64, f64) {
    let e2 = ellipsoid.e2();
    let nu = ellipsoid.a / (1. - e2 * phi.sin().powi(2)).sqrt();
    (
        nu * phi.cos() * lambda.cos(),
        nu * phi.cos() * lambda.sin(),
        (1. - e2) * nu * phi.sin(),
    )
}

fn helmert_to_osgb36(x: f64, y: f64, z: f64) -> (f64, f64, f64) {
    let s = 1. + S_PPM * 1e-6;
    let rx = (RX_SEC / 3600.).to_radians();
    let ry = (RY_SEC / 3600.).to_radians();
    let rz = (RZ_SEC / 3600.).to_radians();
    (
        TX + s * x - rz * y + ry * z,
        TY + rz * x + s * y - rx * z,
        TZ - ry * x + rx * y + s * z,
    )
}

fn to_geodetic(ellipsoid: &Ellipsoid, x: f64, y: f64, z: f64) -> (f64, f64) {
    let e2 = ellipsoid.e2();
    let p = (x * x + y * y).sqrt();
    let mut phi = z.atan2(p * (1. - e2));
    for _ in 0..10 {
        let nu = ellipsoid.a / (1. - e2 * phi.sin().powi(2)).sqrt();
        let next = (z + e2 * nu * phi.sin()).atan2(p);
        if (next - phi).abs() < 1e-12 {
            phi = next;
            break;
        }
        phi = next;
    }
    (phi, y.atan2(x))
}

/// Transverse Mercator projection of an OSGB36 latitude/longitude (degrees).
pub fn osgb36_to_grid(lat: f64, lon: f64) -> Coord<f64> {
    let Ellipsoid { a, b } = AIRY_1830;
    let e2 = AIRY_1830.e2();
    let n = (a - b) / (a + b);
    let (n2, n3) = (n * n, n * n * n);

    let phi = lat.to_radians();
    let lambda = lon.to_radians();
    let phi0 = LAT0_DEG.to_radians();
    let lambda0 = LON0_DEG.to_radians();

    let (sin_phi, cos_phi) = phi.sin_cos();
    let nu = a * F0 / (1. - e2 * sin_phi * sin_phi).sqrt();
    let rho = a * F0 * (1. - e2) / (1. - e2 * sin_phi * sin_phi).powf(1.5);
    let eta2 = nu / rho - 1.;

    let dphi = phi - phi0;
    let sphi = phi + phi0;
    let ma = (1. + n + 1.25 * n2 + 1.25 * n3) * dphi;
    let mb = (3. * n + 3. * n2 + 21. / 8. * n3) * dphi.sin() * sphi.cos();
    let mc = (15. / 8. * n2 + 15. / 8. * n3) * (2. * dphi).sin() * (2. * sphi).cos();
    let md = 35. / 24. * n3 * (3. * dphi).sin() * (3. * sphi).cos();
    let m = b * F0 * (ma - mb + mc - md);

    let tan2 = phi.tan().powi(2);
    let tan4 = tan2 * tan2;
    let i = m + N0;
    let ii = nu / 2. * sin_phi * cos_phi;
    let iii = nu / 24. * sin_phi * cos_phi.powi(3) * (5. - tan2 + 9. * eta2);
    let iiia = nu / 720. * sin_phi * cos_phi.powi(5) * (61. - 58. * tan2 + tan4);
    let iv = nu * cos_phi;
    let v = nu / 6. * cos_phi.powi(3) * (nu / rho - tan2);
    let vi = nu / 120.
        * cos_phi.powi(5)
        * (5. - 18. * tan2 + tan4 + 14. * eta2 - 58. * tan2 * eta2);

    let dl = lambda - lambda0;
    let northing = i + ii * dl.powi(2) + iii * dl.powi(4) + iiia * dl.powi(6);
    let easting = E0 + iv * dl + v * dl.powi(3) + vi * dl.powi(5);
    coord! { x: easting, y: northing }
}

/// Two-letter 100km square reference, e.g. `TQ` for central London.
pub fn grid_letters(easting: f64, northing: f64) -> Result<String> {
    if !(0.0..GRID_WIDTH).contains(&easting) || !(0.0..GRID_HEIGHT).contains(&northing) {
        return Err(FetchError::OutsideNationalGrid(easting, northing).into());
    }
    let e100k = (easting / 100_000.).floor() as i64;
    let n100k = (northing / 100_000.).floor() as i64;

    let mut l1 = (19 - n100k) - (19 - n100k) % 5 + (e100k + 10) / 5;
    let mut l2 = (19 - n100k) * 5 % 25 + e100k % 5;
    // 'I' is not used
    if l1 > 7 {
        l1 += 1;
    }
    if l2 > 7 {
        l2 += 1;
    }
    Ok(format!("{}{}", letter(l1), letter(l2)))
}

fn letter(index: i64) -> char {
    (b'A' + index as u8) as char
}

/// EA tile name for the 5km square containing the point, e.g. `TQ37nw`.
pub fn tile_name(easting: f64, northing: f64) -> Result<String> {
    let letters = grid_letters(easting, northing)?;
    let e_digit = ((easting % 100_000.) / 10_000.).floor() as u32;
    let n_digit = ((northing % 100_000.) / 10_000.).floor() as u32;
    let ns = if northing % 10_000. >= TILE_SIZE { 'n' } else { 's' };
    let ew = if easting % 10_000. >= TILE_SIZE { 'e' } else { 'w' };
    Ok(format!("{letters}{e_digit}{n_digit}{ns}{ew}"))
}

/// Bounds of a named 5km tile.
pub fn tile_bounds(name: &str) -> Result<Rect<f64>> {
    let re = Regex::new(r"^(?<l1>[A-HJ-Z])(?<l2>[A-HJ-Z])(?<e>\d)(?<n>\d)(?<ns>[ns])(?<ew>[ew])$")
        .expect("Regex pattern should always compile");

    let captures = re
        .captures(name)
        .ok_or_else(|| FetchError::InvalidTileName(name.to_string()))?;
    let (_, [l1, l2, e, n, ns, ew]) = captures.extract();

    let index = |s: &str| {
        let i = (s.as_bytes()[0] - b'A') as i64;
        if i > 7 {
            i - 1
        } else {
            i
        }
    };
    let (l1, l2) = (index(l1), index(l2));
    let e100k = ((l1 - 2).rem_euclid(5)) * 5 + l2 % 5;
    let n100k = (19 - (l1 / 5) * 5) - l2 / 5;
    if !(0..7).contains(&e100k) || !(0..13).contains(&n100k) {
        return Err(FetchError::InvalidTileName(name.to_string()).into());
    }

    let digit = |s: &str| s.parse::<f64>().unwrap_or_default();
    let mut min_x = e100k as f64 * 100_000. + digit(e) * 10_000.;
    let mut min_y = n100k as f64 * 100_000. + digit(n) * 10_000.;
    if ew == "e" {
        min_x += TILE_SIZE;
    }
    if ns == "n" {
        min_y += TILE_SIZE;
    }
    Ok(tile_rect(min_x, min_y))
}

/// The 5km square with its south-west corner at the given point.
pub fn tile_rect(min_x: f64, min_y: f64) -> Rect<f64> {
    Rect::new(
        coord! { x: min_x, y: min_y },
        coord! { x: min_x + TILE_SIZE, y: min_y + TILE_SIZE },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Intersects;

    fn dms(d: f64, m: f64, s: f64) -> f64 {
        d + m / 60. + s / 3600.
    }

    #[test]
    fn test_transverse_mercator_reference_point() {
        // Worked example from the OS guide to coordinate systems
        let p = osgb36_to_grid(dms(52., 39., 27.2531), dms(1., 43., 4.5177));
        assert!((p.x - 651_409.903).abs() < 0.01, "easting {}", p.x);
        assert!((p.y - 313_177.270).abs() < 0.01, "northing {}", p.y);
    }

    #[test]
    fn test_wgs84_to_bng() {
        // Elizabeth Tower, Westminster
        let p = wgs84_to_bng(-0.124625, 51.500729);
        assert!((p.x - 530_268.1).abs() < 1., "easting {}", p.x);
        assert!((p.y - 179_643.9).abs() < 1., "northing {}", p.y);
    }

    #[test]
    fn test_grid_letters() {
        assert_eq!(grid_letters(530_268., 179_643.).unwrap(), "TQ");
        assert_eq!(grid_letters(325_899., 673_995.).unwrap(), "NT");
        assert_eq!(grid_letters(651_409., 313_177.).unwrap(), "TG");
        assert!(grid_letters(-10., 100.).is_err());
        assert!(grid_letters(700_000., 100.).is_err());
    }

    #[test]
    fn test_tile_name() {
        assert_eq!(tile_name(530_268., 179_643.).unwrap(), "TQ37nw");
        assert_eq!(tile_name(325_899., 673_995.).unwrap(), "NT27se");
        assert_eq!(tile_name(525_000., 175_000.).unwrap(), "TQ27ne");
    }

    #[test]
    fn test_tile_bounds() {
        assert_eq!(
            tile_bounds("TQ37nw").unwrap(),
            tile_rect(530_000., 175_000.)
        );
        assert_eq!(
            tile_bounds("NT27se").unwrap(),
            tile_rect(325_000., 670_000.)
        );
        assert!(tile_bounds("TQ37").is_err());
        assert!(tile_bounds("IQ37nw").is_err());
    }

    #[test]
    fn test_tile_name_and_bounds_agree() {
        for (e, n) in [(412_345., 98_765.), (199_999., 1_099_999.), (650_001., 310_000.)] {
            let name = tile_name(e, n).unwrap();
            let bounds = tile_bounds(&name).unwrap();
            assert!(bounds.intersects(&coord! { x: e, y: n }), "{name} {bounds:?}");
        }
    }
}
