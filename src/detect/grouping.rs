use crate::detect::result::FaceBox;

/// Relative tolerance for two raw hits to count as the same face.
pub(crate) const GROUP_EPS: f64 = 0.2;

/// Cluster raw window hits into face boxes.
///
/// Hits are partitioned by transitive similarity, clusters with
/// `count <= min_neighbors` are dropped, survivors are averaged, and a
/// cluster nested inside a better-supported one is discarded. With
/// `min_neighbors == 0` the raw hits are returned unchanged.
pub(crate) fn group_rectangles(hits: &[FaceBox], min_neighbors: u32, eps: f64) -> Vec<FaceBox> {
    if min_neighbors == 0 || hits.is_empty() {
        return hits.to_vec();
    }

    let labels = partition(hits, eps);
    let classes = labels.iter().copied().max().map_or(0, |m| m + 1);

    let mut sums = vec![[0u64; 4]; classes];
    let mut counts = vec![0u32; classes];
    for (hit, &label) in hits.iter().zip(&labels) {
        let s = &mut sums[label];
        s[0] += hit.x as u64;
        s[1] += hit.y as u64;
        s[2] += hit.width as u64;
        s[3] += hit.height as u64;
        counts[label] += 1;
    }

    let averaged: Vec<FaceBox> = sums
        .iter()
        .zip(&counts)
        .map(|(s, &n)| {
            let avg = |v: u64| ((v as f64) / (n as f64)).round() as u32;
            FaceBox::new(avg(s[0]), avg(s[1]), avg(s[2]), avg(s[3]))
        })
        .collect();

    let mut faces = Vec::new();
    for i in 0..classes {
        let n1 = counts[i];
        if n1 <= min_neighbors {
            continue;
        }
        let r1 = averaged[i];
        let nested = (0..classes).any(|j| {
            let n2 = counts[j];
            if j == i || n2 <= min_neighbors {
                return false;
            }
            let r2 = averaged[j];
            let dx = (r2.width as f64 * eps).round() as i64;
            let dy = (r2.height as f64 * eps).round() as i64;
            let inside = r1.x as i64 >= r2.x as i64 - dx
                && r1.y as i64 >= r2.y as i64 - dy
                && r1.right() as i64 <= r2.right() as i64 + dx
                && r1.bottom() as i64 <= r2.bottom() as i64 + dy;
            inside && (n2 > n1.max(3) || n1 < 3)
        });
        if !nested {
            faces.push(r1);
        }
    }
    faces
}

fn similar(a: &FaceBox, b: &FaceBox, eps: f64) -> bool {
    let delta = eps * (a.width.min(b.width) as f64 + a.height.min(b.height) as f64) * 0.5;
    let close = |p: u32, q: u32| (p as f64 - q as f64).abs() <= delta;
    close(a.x, b.x) && close(a.y, b.y) && close(a.right(), b.right()) && close(a.bottom(), b.bottom())
}

/// Union-find over the similarity relation; labels are dense and ordered by
/// first appearance.
fn partition(hits: &[FaceBox], eps: f64) -> Vec<usize> {
    let mut parent: Vec<usize> = (0..hits.len()).collect();

    fn root(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..hits.len() {
        for j in (i + 1)..hits.len() {
            if similar(&hits[i], &hits[j], eps) {
                let a = root(&mut parent, i);
                let b = root(&mut parent, j);
                if a != b {
                    parent[b.max(a)] = a.min(b);
                }
            }
        }
    }

    let mut dense = vec![usize::MAX; hits.len()];
    let mut next = 0;
    let mut labels = Vec::with_capacity(hits.len());
    for i in 0..hits.len() {
        let r = root(&mut parent, i);
        if dense[r] == usize::MAX {
            dense[r] = next;
            next += 1;
        }
        labels.push(dense[r]);
    }
    labels
}
