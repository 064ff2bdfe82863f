//! HTML of the demo page.
//!
//! The page shows the gallery and the webcam section. Both stay hidden until the server
//! reports the model as loaded. A few lines of script forward clicks and poll the live
//! prediction.

const STYLE: &str = r#"
    body { font-family: sans-serif; margin: 2em; }
    .invisible { opacity: 0.2; pointer-events: none; }
    .removed { display: none; }
    .classifyOnClick { display: inline-block; max-width: 320px; margin: 0.5em; vertical-align: top; }
    .classifyOnClick img { width: 100%; cursor: pointer; }
    #webcam { width: 640px; }
"#;

const SCRIPT: &str = r#"
    const demosSection = document.getElementById('demos');
    const channel = demosSection.dataset.channel;

    function pollStatus() {
      fetch('/status').then(r => r.json()).then(status => {
        if (status.ready) {
          demosSection.classList.remove('invisible');
        } else {
          setTimeout(pollStatus, 1000);
        }
      });
    }
    pollStatus();

    for (const img of document.querySelectorAll('.classifyOnClick img')) {
      img.src = '/gallery/' + encodeURIComponent(img.dataset.name);
      img.addEventListener('click', function (event) {
        fetch('/classify_gallery?name=' + encodeURIComponent(img.dataset.name), { method: 'POST' })
          .then(r => r.ok ? r.json() : null)
          .then(result => {
            if (!result) return;
            const p = document.createElement('p');
            p.innerText = result.description;
            event.target.parentNode.appendChild(p);
          });
      });
    }

    const video = document.getElementById('webcam');
    const webcamPredictions = document.getElementById('webcamPredictions');

    function predictWebcam() {
      fetch('/prediction?name=' + encodeURIComponent(channel))
        .then(r => r.status === 200 ? r.json() : null)
        .then(result => {
          if (result) webcamPredictions.innerText = result.description;
          window.requestAnimationFrame(predictWebcam);
        });
    }

    document.getElementById('webcamButton').addEventListener('click', function (event) {
      fetch('/enable_cam?name=' + encodeURIComponent(channel), { method: 'POST' }).then(r => {
        if (!r.ok) return;
        event.target.classList.add('removed');
        video.src = '/classified_stream?name=' + encodeURIComponent(channel);
        predictWebcam();
      });
    });
"#;

/// Render the demo page for the given gallery images and webcam channel.
pub fn render_index(images: &[String], ready: bool, channel: &str) -> String {
    let figures: String = images
        .iter()
        .map(|name| {
            format!(
                "      <div class=\"classifyOnClick\"><img data-name=\"{0}\" title=\"Click to classify {0}\"/></div>\n",
                escape_html(name)
            )
        })
        .collect();
    let gallery = if figures.is_empty() {
        "      <p>The gallery is empty.</p>\n".to_owned()
    } else {
        figures
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8">
    <title>Image classification</title>
    <style>{style}</style>
  </head>
  <body>
    <h1>Image classification with MobileNet</h1>
    <p id="status">{status}</p>
    <section id="demos" class="{demos_class}" data-channel="{channel}">
      <h2>Demo: Classify images</h2>
      <p>Click on an image to see what the model thinks it contains.</p>
{gallery}
      <h2>Demo: Webcam continuous classification</h2>
      <p>Start the camera sender for channel <code>{channel}</code>, then enable the webcam.</p>
      <button id="webcamButton">Enable Webcam</button>
      <div><img id="webcam" alt=""/></div>
      <p id="webcamPredictions"></p>
    </section>
    <script>{script}</script>
  </body>
</html>
"#,
        style = STYLE,
        status = if ready {
            "Model loaded."
        } else {
            "Loading model, please wait..."
        },
        demos_class = if ready { "" } else { "invisible" },
        channel = escape_html(channel),
        gallery = gallery,
        script = SCRIPT,
    )
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}
