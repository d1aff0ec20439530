//! Logo detection and removal on raw pixels.
//!
//! ## Detection
//!
//! Each template is slid over the image and scored with the normalised
//! cross-correlation coefficient (mean-subtracted, summed over the three colour
//! channels). Window sums come from integral images, so only the template
//! cross term is computed per offset. Zero-variance windows and templates score
//! 0: a flat patch carries no shape to match.
//!
//! Every top-left offset is scored at full resolution. The cross term is
//! accumulated row by row, and an offset is abandoned as soon as the
//! Cauchy-Schwarz bound on the rows still to come shows it cannot reach the
//! threshold. The bound is exact, so pruning never drops a real match.
//!
//! ## Removal
//!
//! Every offset scoring at or above the threshold is drawn as a filled
//! rectangle onto one shared [`Mask`]. The mask is a logical OR, so overlapping
//! hits from different templates are inpainted once. Masked pixels are then
//! rebuilt with fast-marching inpainting (Telea): pixels are filled from the
//! boundary inwards, each one a weighted first-order extrapolation of the known
//! pixels within `inpaint_radius`.

use crate::error::{LogoError, SanitizeError};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Rows accumulated between two checks of the pruning bound.
const PRUNE_EVERY_ROWS: usize = 4;

const MIN_VARIANCE: f64 = 1e-6;

/// Tunables for [`remove_logos`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogoOptions {
    /// Minimum similarity in `[0, 1]` for a match. Default: 0.8.
    ///
    /// Values above 1.0 disable removal entirely.
    pub threshold: f32,
    /// Neighbourhood radius in pixels used by inpainting. Default: 3.
    pub inpaint_radius: u32,
}

impl Default for LogoOptions {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            inpaint_radius: 3,
        }
    }
}

/// One known logo.
#[derive(Debug, Clone)]
pub struct Template {
    pub name: String,
    pub image: RgbImage,
}

/// All logos to remove. Order is irrelevant.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    templates: Vec<Template>,
}

impl TemplateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, image: RgbImage) {
        self.templates.push(Template {
            name: name.into(),
            image,
        });
    }

    pub fn with(mut self, name: impl Into<String>, image: RgbImage) -> Self {
        self.push(name, image);
        self
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Template> {
        self.templates.iter()
    }

    /// Load every `.png`, `.jpg` and `.jpeg` file in `dir` as a template.
    ///
    /// Files are read in name order; other files are ignored.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, SanitizeError> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|e| SanitizeError::TemplateLoadFailed {
            path: dir.to_path_buf(),
            detail: e.to_string(),
        })?;

        let mut paths: Vec<_> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| matches!(e.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        let mut set = Self::new();
        for path in paths {
            let image = image::open(&path)
                .map_err(|e| SanitizeError::TemplateLoadFailed {
                    path: path.clone(),
                    detail: e.to_string(),
                })?
                .to_rgb8();
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            debug!(
                "Loaded logo template '{}' ({}x{})",
                name,
                image.width(),
                image.height()
            );
            set.push(name, image);
        }
        info!("Loaded {} logo templates from {}", set.len(), dir.display());
        Ok(set)
    }
}

/// A template hit at one offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub score: f32,
}

/// Binary mask with the image's dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl Mask {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bits: vec![false; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// OR a filled rectangle into the mask, clipped to its bounds.
    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32) {
        let x_end = x.saturating_add(width).min(self.width);
        let y_end = y.saturating_add(height).min(self.height);
        for row in y.min(self.height)..y_end {
            let base = row as usize * self.width as usize;
            for col in x.min(self.width)..x_end {
                self.bits[base + col as usize] = true;
            }
        }
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height && self.bits[y as usize * self.width as usize + x as usize]
    }

    /// Number of masked pixels.
    pub fn count(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    pub fn is_empty(&self) -> bool {
        !self.bits.iter().any(|&b| b)
    }
}

/// Output of [`remove_logos`].
#[derive(Debug, Clone)]
pub struct LogoRemoval {
    pub image: RgbImage,
    /// Offsets that scored at or above the threshold, over all templates.
    pub matches: usize,
    pub masked_pixels: usize,
}

/// Detect every template in `image` and inpaint the matched regions.
///
/// Returns the input pixels unchanged when nothing matches. Templates larger
/// than the image are skipped with a warning.
///
/// # Errors
/// [`LogoError`] when the image or a template has a zero dimension.
pub fn remove_logos(
    image: &RgbImage,
    templates: &TemplateSet,
    options: &LogoOptions,
) -> Result<LogoRemoval, LogoError> {
    let (mask, matches) = build_mask(image, templates, options.threshold)?;
    if matches == 0 {
        debug!("No logo detected above threshold {}", options.threshold);
        return Ok(LogoRemoval {
            image: image.clone(),
            matches: 0,
            masked_pixels: 0,
        });
    }

    let masked_pixels = mask.count();
    info!(
        "Found {} logo matches covering {} pixels; inpainting",
        matches, masked_pixels
    );
    Ok(LogoRemoval {
        image: inpaint(image, &mask, options.inpaint_radius),
        matches,
        masked_pixels,
    })
}

/// OR every match of every template into one mask.
///
/// Returns the mask and the number of matching offsets.
pub fn build_mask(
    image: &RgbImage,
    templates: &TemplateSet,
    threshold: f32,
) -> Result<(Mask, usize), LogoError> {
    let (iw, ih) = image.dimensions();
    if iw == 0 || ih == 0 {
        return Err(LogoError::EmptyImage {
            width: iw,
            height: ih,
        });
    }
    for t in templates.iter() {
        let (tw, th) = t.image.dimensions();
        if tw == 0 || th == 0 {
            return Err(LogoError::EmptyTemplate {
                name: t.name.clone(),
                width: tw,
                height: th,
            });
        }
    }

    let mut mask = Mask::new(iw, ih);
    let mut matches = 0;
    if threshold > 1.0 {
        return Ok((mask, matches));
    }

    let correlator = Correlator::new(image);
    for t in templates.iter() {
        let (tw, th) = t.image.dimensions();
        if tw > iw || th > ih {
            warn!(
                "Skipping logo template '{}': {}x{} is larger than the {}x{} image",
                t.name, tw, th, iw, ih
            );
            continue;
        }
        let found = search(&correlator, image, &t.image, threshold);
        debug!("Template '{}': {} matches", t.name, found.len());
        for m in &found {
            mask.fill_rect(m.x, m.y, m.width, m.height);
        }
        matches += found.len();
    }
    Ok((mask, matches))
}

/// All offsets where `template` scores at least `threshold`.
pub fn find_matches(image: &RgbImage, template: &RgbImage, threshold: f32) -> Vec<MatchRegion> {
    let (iw, ih) = image.dimensions();
    let (tw, th) = template.dimensions();
    if iw == 0 || ih == 0 || tw == 0 || th == 0 || tw > iw || th > ih || threshold > 1.0 {
        return Vec::new();
    }
    search(&Correlator::new(image), image, template, threshold)
}

/// Exhaustive similarity map, row-major, `(iw - tw + 1) x (ih - th + 1)`.
pub fn match_scores(image: &RgbImage, template: &RgbImage) -> Vec<f32> {
    let (iw, ih) = image.dimensions();
    let (tw, th) = template.dimensions();
    if tw == 0 || th == 0 || tw > iw || th > ih {
        return Vec::new();
    }
    let correlator = Correlator::new(image);
    let prepared = PreparedTemplate::new(template);
    let mut scores = Vec::with_capacity(((iw - tw + 1) * (ih - th + 1)) as usize);
    for y in 0..=ih - th {
        for x in 0..=iw - tw {
            scores.push(correlator.score(&prepared, x, y));
        }
    }
    scores
}

fn search(
    correlator: &Correlator,
    image: &RgbImage,
    template: &RgbImage,
    threshold: f32,
) -> Vec<MatchRegion> {
    let (iw, ih) = image.dimensions();
    let (tw, th) = template.dimensions();
    let prepared = PreparedTemplate::new(template);
    let mut found = Vec::new();
    for y in 0..=ih - th {
        for x in 0..=iw - tw {
            if let Some(score) = correlator.score_at_least(&prepared, x, y, threshold) {
                found.push(MatchRegion {
                    x,
                    y,
                    width: tw,
                    height: th,
                    score,
                });
            }
        }
    }
    found
}

struct PreparedTemplate {
    width: u32,
    height: u32,
    /// Mean-subtracted samples, row-major, three per pixel.
    deviations: Vec<f64>,
    norm2: f64,
    /// `tail_norm2[r]`: squared deviations of rows `r..height`.
    tail_norm2: Vec<f64>,
}

impl PreparedTemplate {
    fn new(template: &RgbImage) -> Self {
        let raw = template.as_raw();
        let n = (template.width() * template.height()) as f64;
        let mut mean = [0f64; 3];
        for px in raw.chunks_exact(3) {
            for c in 0..3 {
                mean[c] += px[c] as f64;
            }
        }
        for m in &mut mean {
            *m /= n;
        }
        let deviations: Vec<f64> = raw
            .chunks_exact(3)
            .flat_map(|px| (0..3).map(move |c| px[c] as f64 - mean[c]))
            .collect();
        let norm2 = deviations.iter().map(|d| d * d).sum();

        let row_len = template.width() as usize * 3;
        let rows = template.height() as usize;
        let mut tail_norm2 = vec![0f64; rows + 1];
        for r in (0..rows).rev() {
            let row = &deviations[r * row_len..(r + 1) * row_len];
            tail_norm2[r] = tail_norm2[r + 1] + row.iter().map(|d| d * d).sum::<f64>();
        }
        Self {
            width: template.width(),
            height: template.height(),
            deviations,
            norm2,
            tail_norm2,
        }
    }
}

/// Integral images of an image's per-channel samples and pooled squares.
struct Correlator<'a> {
    image: &'a RgbImage,
    stride: usize,
    sums: [Vec<f64>; 3],
    squares: Vec<f64>,
}

impl<'a> Correlator<'a> {
    fn new(image: &'a RgbImage) -> Self {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let stride = w + 1;
        let size = stride * (h + 1);
        let mut sums = [vec![0f64; size], vec![0f64; size], vec![0f64; size]];
        let mut squares = vec![0f64; size];
        let raw = image.as_raw();
        for y in 0..h {
            let mut row_sum = [0f64; 3];
            let mut row_sq = 0f64;
            for x in 0..w {
                let i = (y * w + x) * 3;
                let at = (y + 1) * stride + x + 1;
                for c in 0..3 {
                    let v = raw[i + c] as f64;
                    row_sum[c] += v;
                    row_sq += v * v;
                    sums[c][at] = sums[c][at - stride] + row_sum[c];
                }
                squares[at] = squares[at - stride] + row_sq;
            }
        }
        Self {
            image,
            stride,
            sums,
            squares,
        }
    }

    fn window(&self, table: &[f64], x: usize, y: usize, w: usize, h: usize) -> f64 {
        let s = self.stride;
        table[(y + h) * s + x + w] - table[y * s + x + w] - table[(y + h) * s + x] + table[y * s + x]
    }

    /// Sum over channels of the window's squared deviations from its
    /// per-channel means.
    fn window_variance(&self, x: usize, y: usize, w: usize, h: usize) -> f64 {
        let n = (w * h) as f64;
        let squares = self.window(&self.squares, x, y, w, h);
        let mean_term: f64 = self
            .sums
            .iter()
            .map(|table| {
                let s = self.window(table, x, y, w, h);
                s * s / n
            })
            .sum();
        (squares - mean_term).max(0.0)
    }

    /// Similarity of `t` placed with its top-left corner at `(x, y)`, in `[0, 1]`.
    fn score(&self, t: &PreparedTemplate, x: u32, y: u32) -> f32 {
        if t.norm2 <= MIN_VARIANCE {
            return 0.0;
        }
        let (x, y) = (x as usize, y as usize);
        let (tw, th) = (t.width as usize, t.height as usize);
        let window_var = self.window_variance(x, y, tw, th);
        if window_var <= MIN_VARIANCE {
            return 0.0;
        }

        // The template deviations sum to zero per channel, so the window
        // mean drops out of the cross term.
        let raw = self.image.as_raw();
        let iw = self.image.width() as usize;
        let mut num = 0f64;
        for ty in 0..th {
            let row = ((y + ty) * iw + x) * 3;
            let trow = ty * tw * 3;
            let img = &raw[row..row + tw * 3];
            let dev = &t.deviations[trow..trow + tw * 3];
            for (a, b) in img.iter().zip(dev) {
                num += *a as f64 * b;
            }
        }

        let score = num / (t.norm2 * window_var).sqrt();
        (score as f32).clamp(0.0, 1.0)
    }

    /// [`Self::score`] if it is at least `threshold`, else `None`.
    ///
    /// The cross term is summed as `(a - mean) * b` row by row. After `k`
    /// rows the rest can add at most `sqrt(V_rest * T_rest)`, where `V_rest`
    /// and `T_rest` are the window's and the template's squared deviations
    /// over the remaining rows. Once even that cannot lift the score to the
    /// threshold the offset is dropped.
    fn score_at_least(&self, t: &PreparedTemplate, x: u32, y: u32, threshold: f32) -> Option<f32> {
        if threshold <= 0.0 {
            return Some(self.score(t, x, y));
        }
        if t.norm2 <= MIN_VARIANCE {
            return None;
        }
        let (x, y) = (x as usize, y as usize);
        let (tw, th) = (t.width as usize, t.height as usize);
        let n = (tw * th) as f64;
        let means = [0, 1, 2].map(|c| self.window(&self.sums[c], x, y, tw, th) / n);
        let window_var = self.window_variance(x, y, tw, th);
        if window_var <= MIN_VARIANCE {
            return None;
        }

        let target = threshold as f64 * (t.norm2 * window_var).sqrt();
        // Keeps float noise in the bound from pruning a score sitting exactly
        // on the threshold.
        let slack = 1e-9 * (t.norm2 * window_var).sqrt() + 1e-6;
        let raw = self.image.as_raw();
        let iw = self.image.width() as usize;
        let mut num = 0f64;
        for ty in 0..th {
            let row = ((y + ty) * iw + x) * 3;
            let trow = ty * tw * 3;
            let img = &raw[row..row + tw * 3];
            let dev = &t.deviations[trow..trow + tw * 3];
            for (i, (a, b)) in img.iter().zip(dev).enumerate() {
                num += (*a as f64 - means[i % 3]) * b;
            }

            let done = ty + 1;
            if done < th && done % PRUNE_EVERY_ROWS == 0 {
                let rest = self.deviation_energy(x, y + done, tw, th - done, &means);
                if num + (rest * t.tail_norm2[done]).sqrt() + slack < target {
                    return None;
                }
            }
        }

        // Survivors are rare; rescore them the same way as the score map.
        let score = self.score(t, x as u32, y as u32);
        (score >= threshold).then_some(score)
    }

    /// Sum over channels of squared deviations from `means` inside a window.
    fn deviation_energy(&self, x: usize, y: usize, w: usize, h: usize, means: &[f64; 3]) -> f64 {
        let n = (w * h) as f64;
        let squares = self.window(&self.squares, x, y, w, h);
        let cross: f64 = (0..3)
            .map(|c| {
                let s = self.window(&self.sums[c], x, y, w, h);
                2.0 * means[c] * s - n * means[c] * means[c]
            })
            .sum();
        (squares - cross).max(0.0)
    }
}

// ── Inpainting ───────────────────────────────────────────────────────────────

const KNOWN: u8 = 0;
const BAND: u8 = 1;
const INSIDE: u8 = 2;

const FAR: f32 = 1.0e6;

#[derive(Clone, Copy, PartialEq)]
struct Node {
    t: f32,
    idx: usize,
}

impl Eq for Node {}

impl PartialOrd for Node {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Node {
    fn cmp(&self, other: &Self) -> Ordering {
        self.t
            .total_cmp(&other.t)
            .then_with(|| self.idx.cmp(&other.idx))
    }
}

/// Rebuild masked pixels from their surroundings with fast-marching
/// inpainting.
///
/// If the mask covers the whole image there is nothing to extrapolate from and
/// every pixel is set to black.
pub fn inpaint(image: &RgbImage, mask: &Mask, radius: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    let mut out = image.clone();
    if mask.is_empty() || mask.width() != w || mask.height() != h {
        return out;
    }
    let total = w as usize * h as usize;
    if mask.count() == total {
        warn!("Logo mask covers the whole image; blanking it");
        for px in out.pixels_mut() {
            *px = image::Rgb([0, 0, 0]);
        }
        return out;
    }

    let mut field = Field {
        width: w as usize,
        height: h as usize,
        flags: vec![KNOWN; total],
        dist: vec![0f32; total],
        radius: radius.max(1) as i64,
    };
    for (i, &masked) in mask.bits.iter().enumerate() {
        if masked {
            field.flags[i] = INSIDE;
            field.dist[i] = FAR;
        }
    }

    let mut heap = BinaryHeap::new();
    for i in 0..total {
        if field.flags[i] == KNOWN && field.neighbours(i).any(|n| field.flags[n] == INSIDE) {
            field.flags[i] = BAND;
            heap.push(Reverse(Node { t: 0.0, idx: i }));
        }
    }

    while let Some(Reverse(Node { idx, .. })) = heap.pop() {
        if field.flags[idx] == KNOWN {
            continue;
        }
        field.flags[idx] = KNOWN;
        let neighbours: Vec<usize> = field.neighbours(idx).collect();
        for n in neighbours {
            if field.flags[n] != INSIDE {
                continue;
            }
            field.dist[n] = field.arrival_time(n);
            let value = field.extrapolate(&out, n);
            let (x, y) = field.coords(n);
            out.put_pixel(x as u32, y as u32, image::Rgb(value));
            field.flags[n] = BAND;
            heap.push(Reverse(Node {
                t: field.dist[n],
                idx: n,
            }));
        }
    }
    out
}

struct Field {
    width: usize,
    height: usize,
    flags: Vec<u8>,
    dist: Vec<f32>,
    radius: i64,
}

impl Field {
    fn coords(&self, idx: usize) -> (i64, i64) {
        ((idx % self.width) as i64, (idx / self.width) as i64)
    }

    fn index(&self, x: i64, y: i64) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            None
        } else {
            Some(y as usize * self.width + x as usize)
        }
    }

    fn neighbours(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        let (x, y) = self.coords(idx);
        [(x - 1, y), (x + 1, y), (x, y - 1), (x, y + 1)]
            .into_iter()
            .filter_map(move |(nx, ny)| self.index(nx, ny))
    }

    fn settled(&self, idx: Option<usize>) -> Option<usize> {
        idx.filter(|&i| self.flags[i] != INSIDE)
    }

    /// Eikonal update from one horizontal and one vertical neighbour.
    fn solve(&self, a: Option<usize>, b: Option<usize>) -> f32 {
        match (self.settled(a), self.settled(b)) {
            (Some(a), Some(b)) => {
                let (ta, tb) = (self.dist[a], self.dist[b]);
                if (ta - tb).abs() >= 1.0 {
                    1.0 + ta.min(tb)
                } else {
                    (ta + tb + (2.0 - (ta - tb) * (ta - tb)).sqrt()) * 0.5
                }
            }
            (Some(a), None) => 1.0 + self.dist[a],
            (None, Some(b)) => 1.0 + self.dist[b],
            (None, None) => FAR,
        }
    }

    fn arrival_time(&self, idx: usize) -> f32 {
        let (x, y) = self.coords(idx);
        let left = self.index(x - 1, y);
        let right = self.index(x + 1, y);
        let up = self.index(x, y - 1);
        let down = self.index(x, y + 1);
        self.solve(left, up)
            .min(self.solve(right, up))
            .min(self.solve(left, down))
            .min(self.solve(right, down))
    }

    /// Central difference of `value` along one axis where both sides are
    /// settled, one-sided otherwise.
    fn gradient(&self, x: i64, y: i64, dx: i64, dy: i64, value: impl Fn(usize) -> f32) -> f32 {
        let Some(centre) = self.index(x, y) else {
            return 0.0;
        };
        let fwd = self.settled(self.index(x + dx, y + dy));
        let back = self.settled(self.index(x - dx, y - dy));
        match (fwd, back) {
            (Some(f), Some(b)) => (value(f) - value(b)) * 0.5,
            (Some(f), None) => value(f) - value(centre),
            (None, Some(b)) => value(centre) - value(b),
            (None, None) => 0.0,
        }
    }

    fn extrapolate(&self, img: &RgbImage, idx: usize) -> [u8; 3] {
        let (x, y) = self.coords(idx);
        let t_here = self.dist[idx];
        let grad_tx = self.gradient(x, y, 1, 0, |i| self.dist[i]);
        let grad_ty = self.gradient(x, y, 0, 1, |i| self.dist[i]);
        let sample = |i: usize, c: usize| {
            let (px, py) = self.coords(i);
            img.get_pixel(px as u32, py as u32)[c] as f32
        };

        let mut acc = [0f32; 3];
        let mut weight_sum = 0f32;
        let r = self.radius;
        for ky in y - r..=y + r {
            for kx in x - r..=x + r {
                let Some(k) = self.settled(self.index(kx, ky)) else {
                    continue;
                };
                let (rx, ry) = ((x - kx) as f32, (y - ky) as f32);
                let len2 = rx * rx + ry * ry;
                if len2 == 0.0 || len2 > (r * r) as f32 {
                    continue;
                }
                let dst = 1.0 / len2;
                let lev = 1.0 / (1.0 + (self.dist[k] - t_here).abs());
                let mut dir = (rx * grad_tx + ry * grad_ty) / len2.sqrt();
                if dir.abs() <= 0.01 {
                    dir = 1.0e-6;
                }
                let w = (dir * dst * lev).abs();

                for (c, slot) in acc.iter_mut().enumerate() {
                    let gx = self.gradient(kx, ky, 1, 0, |i| sample(i, c));
                    let gy = self.gradient(kx, ky, 0, 1, |i| sample(i, c));
                    *slot += w * (sample(k, c) + gx * rx + gy * ry);
                }
                weight_sum += w;
            }
        }

        if weight_sum <= 0.0 {
            return self.neighbour_mean(img, idx);
        }
        acc.map(|v| (v / weight_sum).round().clamp(0.0, 255.0) as u8)
    }

    fn neighbour_mean(&self, img: &RgbImage, idx: usize) -> [u8; 3] {
        let known: Vec<usize> = self
            .neighbours(idx)
            .filter(|&n| self.flags[n] != INSIDE)
            .collect();
        if known.is_empty() {
            return [0, 0, 0];
        }
        let mut acc = [0u32; 3];
        for &n in &known {
            let (px, py) = self.coords(n);
            let p = img.get_pixel(px as u32, py as u32);
            for c in 0..3 {
                acc[c] += p[c] as u32;
            }
        }
        acc.map(|v| (v / known.len() as u32) as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::imageops;
    use image::Rgb;

    fn noise_image(w: u32, h: u32, seed: u64) -> RgbImage {
        let mut s = seed;
        RgbImage::from_fn(w, h, |_, _| {
            s = s
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let v = (s >> 33) as u32;
            Rgb([v as u8, (v >> 8) as u8, (v >> 16) as u8])
        })
    }

    fn crop(img: &RgbImage, x: u32, y: u32, w: u32, h: u32) -> RgbImage {
        imageops::crop_imm(img, x, y, w, h).to_image()
    }

    #[test]
    fn exact_crop_scores_one_at_its_offset() {
        let img = noise_image(24, 20, 7);
        let t = crop(&img, 5, 6, 6, 5);
        let scores = match_scores(&img, &t);
        let out_w = 24 - 6 + 1;
        assert_eq!(scores.len(), out_w * (20 - 5 + 1));
        let best = scores[6 * out_w + 5];
        assert!((best - 1.0).abs() < 1e-4, "score was {best}");
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
    }

    #[test]
    fn no_match_returns_image_unchanged() {
        let img = noise_image(32, 32, 1);
        let unrelated = noise_image(8, 8, 99);
        let set = TemplateSet::new().with("other", unrelated);
        let out = remove_logos(&img, &set, &LogoOptions::default()).unwrap();
        assert_eq!(out.matches, 0);
        assert_eq!(out.image, img);
    }

    #[test]
    fn threshold_above_one_never_matches() {
        let img = noise_image(20, 20, 3);
        let set = TemplateSet::new()
            .with("exact", crop(&img, 2, 2, 6, 6))
            .with("whole", img.clone());
        let opts = LogoOptions {
            threshold: 1.01,
            ..Default::default()
        };
        let out = remove_logos(&img, &set, &opts).unwrap();
        assert_eq!(out.matches, 0);
        assert_eq!(out.image, img);
    }

    #[test]
    fn overlapping_matches_mask_the_union_once() {
        let img = noise_image(40, 40, 11);
        let set = TemplateSet::new()
            .with("a", crop(&img, 10, 10, 8, 8))
            .with("b", crop(&img, 14, 12, 8, 8));
        let (mask, matches) = build_mask(&img, &set, 0.8).unwrap();
        assert_eq!(matches, 2);
        // 64 + 64 - 4 * 6 overlap
        assert_eq!(mask.count(), 104);
        assert!(mask.get(15, 13));
        assert!(!mask.get(9, 9));
    }

    #[test]
    fn matched_region_is_inpainted_and_rest_untouched() {
        let mut img = RgbImage::from_pixel(30, 30, Rgb([120, 120, 120]));
        imageops::replace(&mut img, &noise_image(6, 6, 42), 12, 10);
        let logo = crop(&img, 12, 10, 6, 6);
        let set = TemplateSet::new().with("logo", logo);
        let out = remove_logos(&img, &set, &LogoOptions::default()).unwrap();
        assert_eq!(out.matches, 1);
        assert_eq!(out.masked_pixels, 36);
        for y in 0..30 {
            for x in 0..30 {
                let inside = (12..18).contains(&x) && (10..16).contains(&y);
                let p = out.image.get_pixel(x, y);
                if inside {
                    for c in 0..3 {
                        assert!(
                            (p[c] as i32 - 120).abs() <= 2,
                            "pixel ({x},{y}) = {:?}",
                            p
                        );
                    }
                } else {
                    assert_eq!(p, img.get_pixel(x, y));
                }
            }
        }
    }

    #[test]
    fn oversized_template_is_skipped() {
        let img = noise_image(10, 10, 5);
        let set = TemplateSet::new().with("big", noise_image(12, 4, 6));
        let out = remove_logos(&img, &set, &LogoOptions::default()).unwrap();
        assert_eq!(out.matches, 0);
    }

    #[test]
    fn empty_inputs_are_errors() {
        let img = noise_image(10, 10, 5);
        let set = TemplateSet::new().with("empty", RgbImage::new(0, 3));
        assert!(matches!(
            remove_logos(&img, &set, &LogoOptions::default()),
            Err(LogoError::EmptyTemplate { .. })
        ));
        assert!(matches!(
            remove_logos(&RgbImage::new(0, 0), &TemplateSet::new(), &LogoOptions::default()),
            Err(LogoError::EmptyImage { .. })
        ));
    }

    #[test]
    fn flat_template_never_matches() {
        let img = RgbImage::from_pixel(16, 16, Rgb([9, 9, 9]));
        let t = RgbImage::from_pixel(4, 4, Rgb([9, 9, 9]));
        assert!(find_matches(&img, &t, 0.5).is_empty());
    }

    #[test]
    fn large_template_found_at_any_offset() {
        let img = noise_image(160, 160, 21);
        for (x, y) in [(42, 42), (44, 41), (43, 44), (41, 43), (0, 81), (82, 0)] {
            let t = crop(&img, x, y, 78, 78);
            let found = find_matches(&img, &t, 0.8);
            assert!(
                found.iter().any(|m| m.x == x && m.y == y && m.score > 0.99),
                "logo at ({x},{y}) not found: {found:?}"
            );
        }

        let set = TemplateSet::new().with("logo", crop(&img, 44, 41, 78, 78));
        let out = remove_logos(&img, &set, &LogoOptions::default()).unwrap();
        assert!(out.matches >= 1);
        assert_ne!(out.image, img);
    }

    #[test]
    fn pruned_search_agrees_with_score_map() {
        let mut img = noise_image(48, 40, 8);
        // The blurred copy gives partial scores around (30, 25).
        let logo = crop(&img, 5, 7, 12, 10);
        let blurred = imageops::blur(&logo, 0.8);
        imageops::replace(&mut img, &blurred, 30, 25);

        let out_w = (48 - 12 + 1) as usize;
        let scores = match_scores(&img, &logo);
        for threshold in [0.3, 0.6, 0.8, 0.95] {
            let expected: Vec<(u32, u32)> = scores
                .iter()
                .enumerate()
                .filter(|(_, s)| **s >= threshold)
                .map(|(i, _)| ((i % out_w) as u32, (i / out_w) as u32))
                .collect();
            let found: Vec<(u32, u32)> = find_matches(&img, &logo, threshold)
                .iter()
                .map(|m| (m.x, m.y))
                .collect();
            assert_eq!(found, expected, "threshold {threshold}");
        }
    }

    #[test]
    fn full_mask_blanks_image() {
        let img = noise_image(6, 6, 2);
        let mut mask = Mask::new(6, 6);
        mask.fill_rect(0, 0, 6, 6);
        let out = inpaint(&img, &mask, 3);
        assert!(out.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn mask_fill_is_clipped() {
        let mut mask = Mask::new(5, 5);
        mask.fill_rect(3, 3, 10, 10);
        assert_eq!(mask.count(), 4);
    }

    #[test]
    fn load_dir_reads_images_only() {
        let dir = tempfile::tempdir().unwrap();
        noise_image(4, 4, 1).save(dir.path().join("b.png")).unwrap();
        noise_image(3, 3, 2).save(dir.path().join("a.png")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();
        let set = TemplateSet::load_dir(dir.path()).unwrap();
        let names: Vec<_> = set.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
